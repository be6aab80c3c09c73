pub mod operator;

pub use operator::OperatorContext;
