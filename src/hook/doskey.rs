//! Doskey-style macro expansion of the edited line

use super::line::LineBuffer;

/// Rewrites the edited line in place before it goes back to the host
pub trait MacroExpander {
    fn expand(&mut self, line: &mut LineBuffer<'_>);
}

/// Leaves every line untouched
pub struct NoMacros;

impl MacroExpander for NoMacros {
    fn expand(&mut self, _line: &mut LineBuffer<'_>) {}
}

/// Expands the first word through an alias lookup.
///
/// Lines starting with a space are never expanded.
pub struct AliasExpander<F> {
    lookup: F,
}

impl<F> AliasExpander<F>
where
    F: FnMut(&str) -> Option<String>,
{
    pub fn new(lookup: F) -> Self {
        Self { lookup }
    }
}

impl<F> MacroExpander for AliasExpander<F>
where
    F: FnMut(&str) -> Option<String>,
{
    fn expand(&mut self, line: &mut LineBuffer<'_>) {
        let text = line.to_string_lossy();
        if let Some(expanded) = expand_line(&text, &mut self.lookup) {
            tracing::debug!("Macro expanded '{}' -> '{}'", text, expanded);
            line.set(&expanded);
        }
    }
}

/// Expand `line` if its first word names an alias
pub fn expand_line<F>(line: &str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    if line.is_empty() || line.starts_with(' ') {
        return None;
    }

    let (name, rest) = match line.find(char::is_whitespace) {
        Some(pos) => (&line[..pos], line[pos..].trim_start()),
        None => (line, ""),
    };
    let body = lookup(name)?;
    let args: Vec<&str> = rest.split_whitespace().collect();

    let mut out = String::with_capacity(body.len() + rest.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        match chars.next() {
            Some('*') => out.push_str(rest),
            Some(d @ '1'..='9') => {
                let index = d as usize - '1' as usize;
                if let Some(arg) = args.get(index) {
                    out.push_str(arg);
                }
            }
            Some('$') => out.push('$'),
            Some('g' | 'G') => out.push('>'),
            Some('l' | 'L') => out.push('<'),
            Some('b' | 'B') => out.push('|'),
            Some('t' | 'T') => out.push_str(" & "),
            Some(other) => {
                out.push('$');
                out.push(other);
            }
            None => out.push('$'),
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aliases(name: &str) -> Option<String> {
        match name {
            "ll" => Some("dir /w $*".to_string()),
            "swap" => Some("echo $2 $1".to_string()),
            "both" => Some("cd $1$Tdir".to_string()),
            "cost" => Some("echo $$5 $G out.txt $x".to_string()),
            _ => None,
        }
    }

    fn expand(line: &str) -> Option<String> {
        expand_line(line, &mut aliases)
    }

    #[test]
    fn test_star_takes_rest() {
        assert_eq!(expand("ll  C:\\temp  *.txt"), Some("dir /w C:\\temp  *.txt".to_string()));
        assert_eq!(expand("ll"), Some("dir /w ".to_string()));
    }

    #[test]
    fn test_positional_args() {
        assert_eq!(expand("swap a b"), Some("echo b a".to_string()));
        assert_eq!(expand("swap a"), Some("echo  a".to_string()));
    }

    #[test]
    fn test_special_sequences() {
        assert_eq!(expand("both C:\\"), Some("cd C:\\ & dir".to_string()));
        assert_eq!(expand("cost"), Some("echo $5 > out.txt $x".to_string()));
    }

    #[test]
    fn test_no_expansion() {
        assert_eq!(expand("dir"), None);
        assert_eq!(expand(" ll"), None);
        assert_eq!(expand(""), None);
    }

    #[test]
    fn test_expander_rewrites_buffer_within_capacity() {
        let mut storage = [0u16; 8];
        let mut line = LineBuffer::new(&mut storage);
        line.set("ll x");

        AliasExpander::new(aliases).expand(&mut line);
        assert_eq!(line.to_string_lossy(), "dir /w ");
    }
}
