use crate::limiter::RateLimiter;

/// Admission granted by a [`RateLimiter`]
///
/// Dropping the permit releases it on every exit path of the guarded
/// operation. A permit whose window has since been reset is not handed back,
/// since the reset already restored it.
#[must_use = "dropping a permit releases it immediately"]
#[derive(Debug)]
pub struct Permit<'a> {
    limiter: &'a RateLimiter,

    /// Window the permit was taken from
    epoch: u32,
}

impl<'a> Permit<'a> {
    pub(crate) fn new(limiter: &'a RateLimiter, epoch: u32) -> Self {
        Self { limiter, epoch }
    }

    /// Consume the permit without releasing it
    ///
    /// The permit then only comes back with the next window reset.
    pub fn forget(self) {
        std::mem::forget(self);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.limiter.release_from(self.epoch);
    }
}
