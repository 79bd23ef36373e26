pub const VERSION: &str = "0.1.0";

pub fn greet() -> &'static str {
    "hello"
}
