pub mod efficientnet;
pub mod inception_v3;
pub mod resnet50;
