use std::any::Any;

/// Borrowed, type-erased tokenizer object handed to the converter.
///
/// Implemented for every `'static` type, so callers can pass anything and the
/// classifier decides what it is. `type_name` reports the concrete type behind
/// a `&dyn TokenizerHandle`, which is what error messages show.
///
/// Call these methods on `&dyn TokenizerHandle`, not on a `Box` or `Arc`
/// wrapping one, otherwise the wrapper type is what gets reported.
pub trait TokenizerHandle: Any {
    fn type_name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> TokenizerHandle for T {
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Short type name without the module path, e.g. `PlainObject`
pub fn short_type_name(handle: &dyn TokenizerHandle) -> &'static str {
    let full = handle.type_name();
    let base = full.split('<').next().unwrap_or(full);
    match base.rfind("::") {
        Some(idx) => &full[idx + 2..],
        None => full,
    }
}
