pub mod atgm336h;
pub mod lis3dh;
pub mod lsm6dsox;
pub mod pa1010d;
pub mod pcf8523;
pub mod sdcard;
