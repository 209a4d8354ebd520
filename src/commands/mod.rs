pub mod clear;
pub mod genaik;
