use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::Room;
use crate::state::AppState;

// GET /api/rooms
pub async fn list_rooms(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Room>>, AppError> {
    let conn = state.conn()?;
    Ok(Json(queries::list_rooms(&conn)?))
}

// GET /api/rooms/:id
pub async fn get_room(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Room>, AppError> {
    let conn = state.conn()?;
    let room = queries::get_room(&conn, &id)?.ok_or_else(|| AppError::NotFound(format!("room {id}")))?;
    Ok(Json(room))
}

// POST /api/rooms
#[derive(Debug, Deserialize)]
pub struct CreateRoomRequest {
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    pub capacity: Option<i64>,
    #[serde(default)]
    pub equipment: Vec<String>,
    pub location: Option<String>,
}

pub async fn create_room(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateRoomRequest>,
) -> Result<(StatusCode, Json<Room>), AppError> {
    let name = body.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::Validation("name is required".to_string()));
    }
    if body.capacity.is_some_and(|c| c <= 0) {
        return Err(AppError::Validation("capacity must be positive".to_string()));
    }
    let room = Room {
        id: body
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        name,
        capacity: body.capacity,
        equipment: body.equipment,
        location: body.location,
    };

    let conn = state.conn()?;
    if queries::get_room(&conn, &room.id)?.is_some() {
        return Err(AppError::Validation(format!("room {} already exists", room.id)));
    }
    queries::insert_room(&conn, &room)?;
    tracing::info!(room_id = %room.id, name = %room.name, "room created");

    Ok((StatusCode::CREATED, Json(room)))
}
