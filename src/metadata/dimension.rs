/// A named symbolic size. Instances bind each of their entity's
/// dimensions to a non-negative integer at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Dimension {
    pub name: String,
    pub description: Option<String>,
}

impl Dimension {
    pub fn new(name: impl Into<String>) -> Self {
        Dimension { name: name.into(), description: None }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(feature = "serde")]
    fn with_serde() {
        use serde_test::{assert_tokens, Token};

        let dim = Dimension::new("nelements");
        assert_tokens(
            &dim,
            &[
                Token::Struct { name: "Dimension", len: 2 },
                Token::Str("name"),
                Token::String("nelements"),
                Token::Str("description"),
                Token::None,
                Token::StructEnd,
            ],
        );
    }
}
