pub mod tedee;
