pub mod reference; // Vocabulary loading and validation
pub mod retrieval; // Vector and fuzzy related-code retrieval
pub mod coding; // Multi-stage coding pipeline
pub mod evaluation; // Prediction vs expected-output analysis
