pub mod ai_service;
pub mod concept_service;
pub mod prompt_service;
pub mod question_service;
pub mod rag_service;
pub mod retrieval_service;
