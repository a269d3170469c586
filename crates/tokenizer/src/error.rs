use thiserror::Error;

#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Vocabulary mismatch: id {0} is assigned to more than one token")]
    VocabMismatch(u32),

    #[error("Special token missing from vocabulary: {0}")]
    UnknownSpecialToken(String),

    #[error("Corpus contains no characters above the frequency floor")]
    EmptyCorpus,
}

pub type Result<T> = std::result::Result<T, TokenizerError>;
