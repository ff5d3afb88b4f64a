use crate::state::AppState;
use axum::Router;

pub mod dto;
pub mod faculty;
pub mod management;
pub mod patch;
pub mod repo_types;
pub mod services;
pub mod settings;

pub fn router() -> Router<AppState> {
    let office = Router::new()
        .merge(faculty::routes())
        .merge(settings::settings_routes());

    Router::new()
        .nest("/users-management", management::routes())
        .nest("/rds", office.clone())
        .nest("/ets", office)
        .merge(settings::profile_routes())
}
