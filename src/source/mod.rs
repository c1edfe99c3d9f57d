//! Random access to decoded video frames and audio samples

pub mod audio;
pub mod frame;
pub mod resample;
pub mod video;

pub use audio::AudioSource;
pub use frame::{Frame, VideoProperties};
pub use resample::{AudioProperties, ResampleOptions};
pub use video::VideoSource;
