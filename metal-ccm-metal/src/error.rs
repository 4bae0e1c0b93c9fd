use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status}: {message}")]
    UnexpectedStatus { status: u16, message: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("no ipv4 bgp neighbor found for device {0}")]
    NoNeighbor(String),

    #[error("at least one tag is required to match a reservation")]
    EmptyTagSet,

    #[error("invalid api url: {0}")]
    InvalidUrl(String),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::UnexpectedStatus { status, .. } => *status == 404,
            _ => false,
        }
    }

    /// The API reports duplicate BGP sessions as a 422 carrying this message.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::UnexpectedStatus { message, .. } if message.contains("already exists"))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_errors() {
        let exists = Error::UnexpectedStatus {
            status: 422,
            message: "BGP session already exists".into(),
        };
        assert!(exists.is_already_exists());
        assert!(!exists.is_not_found());

        let missing = Error::UnexpectedStatus {
            status: 404,
            message: "Not found".into(),
        };
        assert!(missing.is_not_found());
        assert!(Error::NotFound("device".into()).is_not_found());
        assert!(!Error::NoNeighbor("abc".into()).is_already_exists());
    }
}
