use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Unknown provenance tag: {0}")]
    UnknownProvenance(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            CoreError::UnknownProvenance("maybe".to_string()).to_string(),
            "Unknown provenance tag: maybe"
        );
    }
}
