pub mod info;
pub mod list;
pub mod run;
