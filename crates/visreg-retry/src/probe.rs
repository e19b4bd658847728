//! Value-producing probes.

/// A side-effect-free check sampled repeatedly by the retry loop.
///
/// Any `FnMut() -> Result<T, E>` is a probe.
pub trait Probe {
    type Output;
    type Error;

    fn sample(&mut self) -> Result<Self::Output, Self::Error>;
}

impl<F, T, E> Probe for F
where
    F: FnMut() -> Result<T, E>,
{
    type Output = T;
    type Error = E;

    #[inline]
    fn sample(&mut self) -> Result<T, E> {
        self()
    }
}
