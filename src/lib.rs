pub mod language;
pub mod project;
pub mod runtime;
pub mod tools;

#[cfg(test)]
mod tests;
