pub mod camera_engine;
pub mod easing;
pub mod prediction_worker;
pub mod trajectory;
