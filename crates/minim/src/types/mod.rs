mod closure;
mod number;
mod pair;
mod promise;
mod rational;

pub(crate) use closure::{Closure, Params};
pub(crate) use number::Number;
pub(crate) use pair::Pair;
pub(crate) use promise::Promise;
