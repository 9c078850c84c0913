use crate::{ambient::AmbientComment, animation::SpecialAnimation, presenter::PresenterConfig};

#[derive(Debug, Clone)]
pub enum OverlayUpdate {
    Ambient(AmbientComment),
    Special(SpecialAnimation),
    Deactivate(u64),
    Config(PresenterConfig),
}
