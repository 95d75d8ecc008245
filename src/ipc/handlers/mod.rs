pub mod backup_exchange;
pub mod classes;
pub mod core;
pub mod exams;
pub mod import_marks;
pub mod marks;
pub mod reports;
pub mod students;
pub mod subjects;
