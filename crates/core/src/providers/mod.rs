pub mod cohere;
pub mod openai;

pub use cohere::CohereRerank;
pub use openai::OpenAiCompatEmbeddings;
