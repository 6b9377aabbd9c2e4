pub mod activation;
pub mod conv;
pub mod embedding_bank;
pub mod gru;
pub mod lstm;
pub mod mlp;
pub mod recurrent;
