#[allow(non_snake_case)]
pub mod Compounds;
#[allow(non_snake_case)]
pub mod Quantification;
#[allow(non_snake_case)]
pub mod Utils;
pub mod cli;
pub mod errors;
pub mod settings;
