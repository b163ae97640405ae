#![forbid(unsafe_code)]

//! Conversion between live graphs and raw bundles.
//!
//! Encoding walks owned edges only; weak references are written but never
//! followed. Decoding allocates every instance before populating any field so
//! forward and cyclic references resolve, and stages all values before it
//! commits anything to the runtime.

mod decode;
mod encode;

pub(crate) use decode::decode;
pub(crate) use encode::encode;
