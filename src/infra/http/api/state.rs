use std::sync::Arc;

use crate::application::items::ItemService;
use crate::application::repos::HealthRepo;

#[derive(Clone)]
pub struct ApiState {
    pub items: Arc<ItemService>,
    pub health: Arc<dyn HealthRepo>,
}
