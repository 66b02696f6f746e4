// Application state for HTTP handlers
use crate::application::complaints_service::ComplaintsService;
use crate::application::fuel_economy_service::FuelEconomyService;
use crate::application::stations_service::StationsService;

#[derive(Clone)]
pub struct AppState {
    pub complaints_service: ComplaintsService,
    pub stations_service: StationsService,
    pub fuel_economy_service: FuelEconomyService,
}
