use serde::Deserialize;

use crate::monitoring::models::IncidentStatus;
use crate::notifications::models::DeliveryStatus;

#[derive(Deserialize, Debug, Clone, Default)]
pub struct IncidentsQuery {
    pub status: Option<IncidentStatus>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct AlertEventsQuery {
    pub status: Option<DeliveryStatus>,
}
