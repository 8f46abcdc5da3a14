use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt::{Display, Formatter};

/// Qilin new type representing a futures contract symbol `String` identifier.
///
/// Case is preserved: CZCE and CFFEX symbols are upper-case ("SR501", "IF2501") while SHFE, DCE,
/// GFEX and INE symbols are lower-case ("rb2501", "m2505").
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct Symbol(SmolStr);

impl Display for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<S> From<S> for Symbol
where
    S: Into<SmolStr>,
{
    fn from(input: S) -> Self {
        Symbol::new(input)
    }
}

impl Symbol {
    /// Construct a new [`Symbol`] from the provided `Into<SmolStr>` value.
    pub fn new<S>(input: S) -> Self
    where
        S: Into<SmolStr>,
    {
        Self(input.into())
    }

    /// The alphabetic product prefix of the symbol (eg/ "rb" for "rb2501").
    pub fn product_code(&self) -> ProductCode {
        let prefix_len = self
            .0
            .char_indices()
            .find(|(_, c)| !c.is_ascii_alphabetic())
            .map(|(index, _)| index)
            .unwrap_or(self.0.len());

        ProductCode(SmolStr::new(&self.0[..prefix_len]))
    }
}

/// Product code shared by all delivery months of one futures product.
///
/// eg/ "rb" (rebar), "IF" (CSI 300 index).
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct ProductCode(SmolStr);

impl Display for ProductCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ProductCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl ProductCode {
    pub fn new<S>(input: S) -> Self
    where
        S: Into<SmolStr>,
    {
        Self(input.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_code_extraction() {
        struct TestCase {
            input: &'static str,
            expected: &'static str,
        }

        let cases = vec![
            TestCase {
                input: "rb2501",
                expected: "rb",
            },
            TestCase {
                input: "IF2501",
                expected: "IF",
            },
            TestCase {
                input: "SR501",
                expected: "SR",
            },
            TestCase {
                input: "m2505",
                expected: "m",
            },
        ];

        for (index, test) in cases.iter().enumerate() {
            let actual = Symbol::new(test.input).product_code();
            assert_eq!(
                actual,
                ProductCode::new(test.expected),
                "TC{index} failed for input {}",
                test.input
            );
        }
    }

    #[test]
    fn test_symbol_preserves_case() {
        assert_eq!(Symbol::new("IF2501").as_ref(), "IF2501");
        assert_eq!(Symbol::new("rb2501").as_ref(), "rb2501");
    }
}
