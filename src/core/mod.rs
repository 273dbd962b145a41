// Core modules implementing records, queries, validation, tables, and errors.
pub mod condition;
pub mod database;
pub mod error;
pub mod query;
pub mod table;
pub mod validate;
pub mod value;
pub mod where_clause;
