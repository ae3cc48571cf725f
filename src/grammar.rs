use once_cell::sync::Lazy;
use regex::bytes::Regex;

/// Token grammar, kept as data so the classifier and the aggregator agree on
/// what a token and its separator look like. All classes use Unicode `\w`.

/// Local part: word characters plus `-_+#~!$&'.`, never ending on a dot.
pub const LOCAL_PART: &str = r"[\w\-_+#~!$&'.]*[\w\-_+#~!$&']";

/// Either a bare `@` or a spelled-out ` at `, ` (at) `, ` AT ` and friends.
pub const SEPARATOR: &str = r"@|[ ]\(?[ ]?(?:at|AT)[ ]?\)?[ ]";

/// Domain part: a word run, then labels, then a 2-3 letter top-level label.
pub const DOMAIN_PART: &str = r"\w+[\w\-.]*\.[a-zA-Z-]{2,3}";

/// Optional dot in front of the token. It is consumed but never captured, so
/// a token cannot start inside `...name@host.com`.
pub const LEAD: &str = r"\.?";

/// A token must be followed by a non-word character (consumed, not captured)
/// or by the end of the record.
pub const TERMINATOR: &str = r"(?:[^\w]|$)";

pub const TOKEN_GROUP: &str = "token";

pub fn token_pattern() -> String {
    format!(
        "{LEAD}(?P<{TOKEN_GROUP}>{LOCAL_PART}(?:{SEPARATOR}){DOMAIN_PART}){TERMINATOR}"
    )
}

pub static TOKEN_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&token_pattern()).expect("token grammar must compile")
});

pub static SEPARATOR_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(SEPARATOR).expect("separator grammar must compile")
});
