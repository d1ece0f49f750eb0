pub trait OptionExt<T> {
    /// Consumes the option, running `f` on the value if there is one.
    fn into_foreach<F, U>(self, f: F) where F: FnOnce(T) -> U;
}

impl<T> OptionExt<T> for Option<T> {
    fn into_foreach<F, U>(self, f: F) where F: FnOnce(T) -> U {
        if let Some(value) = self {
            f(value);
        }
    }
}
