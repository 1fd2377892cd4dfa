pub mod decode;
pub mod picture;
pub mod present;
pub mod refresh;
