use crate::Bitrate;

/// Observer of new bandwidth estimates.
///
/// Invoked synchronously from inside [`BandwidthController`][crate::BandwidthController] calls
/// every time an estimate is produced. The listener is owned by the controller and must not
/// try to reach back into it.
///
/// Any `FnMut(Bitrate)` closure is a listener.
///
/// ```
/// use vivace_bwe::{BandwidthController, Bitrate};
///
/// let mut controller = BandwidthController::default();
/// controller.set_listener(|bitrate: Bitrate| {
///     println!("Encoder target: {bitrate}");
/// });
/// ```
pub trait BitrateListener {
    /// A new target bitrate for the encoders/pacer.
    fn on_target_bitrate_requested(&mut self, bitrate: Bitrate);
}

impl<F> BitrateListener for F
where
    F: FnMut(Bitrate),
{
    fn on_target_bitrate_requested(&mut self, bitrate: Bitrate) {
        self(bitrate)
    }
}
