//! Regex field extraction
//!
//! Every source owns an ordered table of extraction rules applied against an
//! immutable fetched document. A rule names the field (for logging), carries
//! the compiled pattern, and a post-processing function that folds the
//! captures into the source's typed record. Fields whose pattern never
//! matches keep their default — a parse miss is not an error.
//!
//! Keeping the tables data-driven confines a site layout change to the
//! pattern strings.

use regex::{Captures, Regex, RegexBuilder};
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::trace;

/// How many matches of the pattern a rule consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// First match only
    First,
    /// Every match, applied in document order
    All,
}

/// One named extraction rule over a record type `R`
pub struct ExtractRule<R> {
    pub field: &'static str,
    pub mode: MatchMode,
    pub pattern: Regex,
    pub apply: fn(&mut R, &Captures),
}

/// Builds a rule, compiling its pattern case-insensitively with `.`
/// matching newlines (HTML attributes and line breaks vary too much for
/// anything stricter)
pub fn rule<R>(
    field: &'static str,
    mode: MatchMode,
    pattern: &str,
    apply: fn(&mut R, &Captures),
) -> ExtractRule<R> {
    ExtractRule {
        field,
        mode,
        pattern: compile(pattern),
        apply,
    }
}

/// Same as [`rule`], but `.` stays line-scoped (for tables whose greedy
/// captures must not run past the end of the line)
pub fn line_rule<R>(
    field: &'static str,
    mode: MatchMode,
    pattern: &str,
    apply: fn(&mut R, &Captures),
) -> ExtractRule<R> {
    ExtractRule {
        field,
        mode,
        pattern: compile_single_line(pattern),
        apply,
    }
}

/// Compiles a pattern the way the rule tables expect
pub fn compile(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .expect("extraction pattern compiles")
}

/// Case-insensitive, but `.` does not match newlines; a pattern can still
/// opt back in locally with `(?s:…)`
pub fn compile_single_line(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .expect("extraction pattern compiles")
}

/// Applies every rule to the document, accumulating into `record`
pub fn run_rules<R>(rules: &[ExtractRule<R>], document: &str, record: &mut R) {
    for rule in rules {
        match rule.mode {
            MatchMode::First => match rule.pattern.captures(document) {
                Some(caps) => (rule.apply)(record, &caps),
                None => trace!("no match for field {}", rule.field),
            },
            MatchMode::All => {
                let mut matched = 0usize;
                for caps in rule.pattern.captures_iter(document) {
                    (rule.apply)(record, &caps);
                    matched += 1;
                }
                if matched == 0 {
                    trace!("no match for field {}", rule.field);
                }
            }
        }
    }
}

/// Removes HTML tags
pub fn strip_tags(text: &str) -> String {
    static TAG_RE: OnceLock<Regex> = OnceLock::new();
    let re = TAG_RE.get_or_init(|| Regex::new(r"</?[^>]*>").expect("tag pattern compiles"));
    re.replace_all(text, "").into_owned()
}

/// Replaces the common Latin-1 HTML entities with their characters;
/// unknown entities are left untouched
pub fn decode_entities(text: &str) -> String {
    static ENTITY_RE: OnceLock<Regex> = OnceLock::new();
    static TABLE: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();

    if !text.contains('&') {
        return text.to_string();
    }
    let re = ENTITY_RE
        .get_or_init(|| Regex::new(r"&[a-zA-Z]+[0-9]*;").expect("entity pattern compiles"));
    let table = TABLE.get_or_init(|| {
        let pairs: &[(&str, &str)] = &[
            ("&amp;", "&"),
            ("&lt;", "<"),
            ("&gt;", ">"),
            ("&quot;", "\""),
            ("&nbsp;", " "),
            ("&laquo;", "«"),
            ("&raquo;", "»"),
            ("&copy;", "©"),
            ("&deg;", "°"),
            ("&euro;", "€"),
            ("&Aacute;", "Á"),
            ("&aacute;", "á"),
            ("&Acirc;", "Â"),
            ("&acirc;", "â"),
            ("&Agrave;", "À"),
            ("&agrave;", "à"),
            ("&Atilde;", "Ã"),
            ("&atilde;", "ã"),
            ("&Auml;", "Ä"),
            ("&auml;", "ä"),
            ("&AElig;", "Æ"),
            ("&aelig;", "æ"),
            ("&Ccedil;", "Ç"),
            ("&ccedil;", "ç"),
            ("&Eacute;", "É"),
            ("&eacute;", "é"),
            ("&Ecirc;", "Ê"),
            ("&ecirc;", "ê"),
            ("&Egrave;", "È"),
            ("&egrave;", "è"),
            ("&Euml;", "Ë"),
            ("&euml;", "ë"),
            ("&Iacute;", "Í"),
            ("&iacute;", "í"),
            ("&Icirc;", "Î"),
            ("&icirc;", "î"),
            ("&Igrave;", "Ì"),
            ("&igrave;", "ì"),
            ("&Iuml;", "Ï"),
            ("&iuml;", "ï"),
            ("&Ntilde;", "Ñ"),
            ("&ntilde;", "ñ"),
            ("&Oacute;", "Ó"),
            ("&oacute;", "ó"),
            ("&Ocirc;", "Ô"),
            ("&ocirc;", "ô"),
            ("&Ograve;", "Ò"),
            ("&ograve;", "ò"),
            ("&Oslash;", "Ø"),
            ("&oslash;", "ø"),
            ("&Otilde;", "Õ"),
            ("&otilde;", "õ"),
            ("&Ouml;", "Ö"),
            ("&ouml;", "ö"),
            ("&Uacute;", "Ú"),
            ("&uacute;", "ú"),
            ("&Ucirc;", "Û"),
            ("&ucirc;", "û"),
            ("&Ugrave;", "Ù"),
            ("&ugrave;", "ù"),
            ("&Uuml;", "Ü"),
            ("&uuml;", "ü"),
            ("&Yacute;", "Ý"),
            ("&yacute;", "ý"),
            ("&yuml;", "ÿ"),
            ("&szlig;", "ß"),
            ("&iexcl;", "¡"),
            ("&iquest;", "¿"),
            ("&middot;", "·"),
            ("&plusmn;", "±"),
            ("&frac12;", "½"),
            ("&frac14;", "¼"),
            ("&frac34;", "¾"),
            ("&sup1;", "¹"),
            ("&sup2;", "²"),
            ("&sup3;", "³"),
            ("&micro;", "µ"),
            ("&para;", "¶"),
            ("&sect;", "§"),
            ("&times;", "×"),
            ("&divide;", "÷"),
        ];
        pairs.iter().copied().collect()
    });
    re.replace_all(text, |caps: &Captures| {
        let entity = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        table.get(entity).copied().unwrap_or(entity).to_string()
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq)]
    struct TestRecord {
        title: String,
        authors: Vec<String>,
        hardcover: bool,
    }

    fn test_rules() -> Vec<ExtractRule<TestRecord>> {
        vec![
            rule(
                "title",
                MatchMode::First,
                r"<h1>(?P<title>[^<]*)</h1>",
                |rec, caps| rec.title = caps["title"].trim().to_string(),
            ),
            rule(
                "author",
                MatchMode::All,
                r"<li class=.author.>([^<]*)</li>",
                |rec, caps| rec.authors.push(caps[1].trim().to_string()),
            ),
            rule(
                "hardcover",
                MatchMode::First,
                r#"<img src="icons/hardcover\.png""#,
                |rec, _| rec.hardcover = true,
            ),
        ]
    }

    #[test]
    fn rules_accumulate_into_the_record() {
        let document = r#"
            <h1> The Left Hand of Darkness </h1>
            <ul><li class="author">Ursula K. Le Guin</li>
            <li class="author">Someone Else</li></ul>
            <img src="icons/hardcover.png">
        "#;
        let mut record = TestRecord::default();
        run_rules(&test_rules(), document, &mut record);
        assert_eq!(record.title, "The Left Hand of Darkness");
        assert_eq!(record.authors, vec!["Ursula K. Le Guin", "Someone Else"]);
        assert!(record.hardcover);
    }

    #[test]
    fn a_parse_miss_keeps_the_default() {
        let mut record = TestRecord::default();
        run_rules(&test_rules(), "<p>nothing of interest</p>", &mut record);
        assert_eq!(record, TestRecord::default());
    }

    #[test]
    fn patterns_match_across_lines_and_case() {
        let rules = vec![rule(
            "plot",
            MatchMode::First,
            r"<DIV>(.*)</DIV>",
            |rec: &mut TestRecord, caps| rec.title = caps[1].to_string(),
        )];
        let mut record = TestRecord::default();
        run_rules(&rules, "<div>line one\nline two</div>", &mut record);
        assert_eq!(record.title, "line one\nline two");
    }

    #[test]
    fn strip_tags_removes_markup() {
        assert_eq!(
            strip_tags(r#"<a href="x"><b>Jean</b></a>, <i>Luc</i>"#),
            "Jean, Luc"
        );
    }

    #[test]
    fn entities_decode_and_unknown_ones_survive() {
        assert_eq!(decode_entities("D&eacute;p&ocirc;t"), "Dépôt");
        assert_eq!(decode_entities("R2&unknown;D2"), "R2&unknown;D2");
        assert_eq!(decode_entities("AT&amp;T"), "AT&T");
    }
}
