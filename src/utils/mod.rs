mod string;

pub use string::{single_quote, with_trailing_newline};
