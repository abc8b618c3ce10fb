/// Escapes a user-supplied value for Lucene-style query syntaxes
/// (MyVariant, openFDA, VICC all speak a Lucene dialect).
///
/// Conservative by intent: every Lucene metacharacter is escaped so a gene
/// symbol or variant string can never change query semantics.
pub(crate) fn escape_lucene_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 4);
    for ch in value.chars() {
        if matches!(
            ch,
            '\\' | '+'
                | '-'
                | '!'
                | '('
                | ')'
                | '{'
                | '}'
                | '['
                | ']'
                | '^'
                | '"'
                | '~'
                | '*'
                | '?'
                | ':'
                | '/'
                | '&'
                | '|'
        ) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::escape_lucene_value;

    #[test]
    fn escapes_metacharacters_in_variant_tokens() {
        assert_eq!(escape_lucene_value("V600E"), "V600E");
        assert_eq!(escape_lucene_value("p.V600E"), "p.V600E");
        assert_eq!(
            escape_lucene_value(r#"EGFR:T790M (exon-20)"#),
            r#"EGFR\:T790M \(exon\-20\)"#
        );
        assert_eq!(escape_lucene_value(r#"a"b\c"#), r#"a\"b\\c"#);
    }
}
