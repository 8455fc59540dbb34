//! Settings database access
//!
//! Read/write settings from the settings table (key-value store). All
//! settings are global (the app has exactly one playback session).

use crate::error::Result;
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use tilawah_common::events::RepeatMode;

/// Get the persisted reciter selection, writing `default` on first read
pub async fn get_selected_reciter(db: &Pool<Sqlite>, default: &str) -> Result<String> {
    match get_setting::<String>(db, "selected_reciter").await? {
        Some(reciter) => Ok(reciter),
        None => {
            set_selected_reciter(db, default).await?;
            Ok(default.to_string())
        }
    }
}

/// Persist the reciter selection
pub async fn set_selected_reciter(db: &Pool<Sqlite>, reciter: &str) -> Result<()> {
    set_setting(db, "selected_reciter", reciter.to_string()).await
}

/// Get the persisted playback speed (clamped to a sane range)
pub async fn get_playback_speed(db: &Pool<Sqlite>) -> Result<f32> {
    match get_setting::<f32>(db, "playback_speed").await? {
        Some(speed) => Ok(speed.clamp(0.5, 3.0)),
        None => Ok(1.0),
    }
}

/// Persist the playback speed
pub async fn set_playback_speed(db: &Pool<Sqlite>, speed: f32) -> Result<()> {
    set_setting(db, "playback_speed", speed.clamp(0.5, 3.0)).await
}

/// Get the persisted repeat mode
pub async fn get_repeat_mode(db: &Pool<Sqlite>) -> Result<RepeatMode> {
    let stored = get_setting::<String>(db, "repeat_mode").await?;
    Ok(stored
        .as_deref()
        .and_then(RepeatMode::from_setting)
        .unwrap_or(RepeatMode::None))
}

/// Persist the repeat mode
pub async fn set_repeat_mode(db: &Pool<Sqlite>, mode: RepeatMode) -> Result<()> {
    set_setting(db, "repeat_mode", mode.as_setting().to_string()).await
}

/// Generic setting read, parsed from its text representation
async fn get_setting<T: FromStr>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(db)
            .await?;
    Ok(row.and_then(|(value,)| value.parse().ok()))
}

/// Generic setting write (upsert)
async fn set_setting<T: ToString>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()> {
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::open_in_memory;

    #[tokio::test]
    async fn first_read_writes_default_reciter() {
        let db = open_in_memory().await.unwrap();
        let reciter = get_selected_reciter(&db, "alafasy").await.unwrap();
        assert_eq!(reciter, "alafasy");

        set_selected_reciter(&db, "husary").await.unwrap();
        let reciter = get_selected_reciter(&db, "alafasy").await.unwrap();
        assert_eq!(reciter, "husary");
    }

    #[tokio::test]
    async fn speed_round_trips_and_clamps() {
        let db = open_in_memory().await.unwrap();
        assert_eq!(get_playback_speed(&db).await.unwrap(), 1.0);

        set_playback_speed(&db, 1.5).await.unwrap();
        assert_eq!(get_playback_speed(&db).await.unwrap(), 1.5);

        set_playback_speed(&db, 99.0).await.unwrap();
        assert_eq!(get_playback_speed(&db).await.unwrap(), 3.0);
    }

    #[tokio::test]
    async fn repeat_mode_round_trips() {
        let db = open_in_memory().await.unwrap();
        assert_eq!(get_repeat_mode(&db).await.unwrap(), RepeatMode::None);

        set_repeat_mode(&db, RepeatMode::Verse).await.unwrap();
        assert_eq!(get_repeat_mode(&db).await.unwrap(), RepeatMode::Verse);
    }
}
