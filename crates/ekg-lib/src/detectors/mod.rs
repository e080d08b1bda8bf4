pub mod rpeak;
