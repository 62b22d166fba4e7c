pub mod compositor;
pub mod config;
#[cfg(feature = "opencv")]
pub mod cv;
pub mod dense_flow;
pub mod detector;
pub mod display;
pub mod error;
pub mod feature;
pub mod frame;
pub mod image;
pub mod my_types;
pub mod optical_flow;
pub mod overlay;
pub mod pyramid;
pub mod session;
pub mod source;
pub mod tracker;
pub mod visualization;
