pub mod builder;
pub mod char_tokenizer;
pub mod error;
pub mod vocab;

pub use builder::VocabBuilder;
pub use char_tokenizer::CharTokenizer;
pub use error::TokenizerError;
pub use vocab::Vocab;
