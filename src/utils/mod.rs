pub mod grades;
pub mod ids;
pub mod validation;
