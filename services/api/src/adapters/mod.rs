pub mod db;
pub mod grading;

pub use db::DbAdapter;
pub use grading::AnswerKeyEngine;
