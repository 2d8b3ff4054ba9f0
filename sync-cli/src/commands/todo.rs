//! Offline todo edits for one home.

use anyhow::{Context, Result};
use std::path::Path;
use sync_client::LocalRepository;
use sync_core::{DeleteOutcome, NewTodo, TodoEntity, TodoUpdate};
use sync_types::{EntityId, HomeId};

use crate::commands::home;
use crate::config::open_store;

async fn repository(data_dir: &Path, home_id: &str) -> Result<LocalRepository<TodoEntity>> {
    let store = open_store(data_dir);
    let home_id = HomeId::new(home_id);
    home::require(store.as_ref(), &home_id).await?;
    Ok(LocalRepository::new(store, home_id))
}

/// Add a todo.
pub async fn add(data_dir: &Path, home_id: &str, text: &str) -> Result<EntityId> {
    let todos = repository(data_dir, home_id).await?;
    let todo = todos
        .create(NewTodo::text(text))
        .await
        .context("Failed to add todo")?;
    println!("Added {}", todo.id());
    Ok(todo.id().clone())
}

/// Mark a todo completed.
pub async fn done(data_dir: &Path, home_id: &str, id: &str) -> Result<()> {
    let todos = repository(data_dir, home_id).await?;
    let update = TodoUpdate {
        completed: Some(true),
        ..TodoUpdate::default()
    };
    todos.update(&EntityId::new(id), update).await?;
    println!("Completed {id}");
    Ok(())
}

/// Delete a todo.
pub async fn remove(data_dir: &Path, home_id: &str, id: &str) -> Result<()> {
    let todos = repository(data_dir, home_id).await?;
    match todos.delete(&EntityId::new(id)).await? {
        DeleteOutcome::HardRemove => println!("Removed {id} (never synced)"),
        DeleteOutcome::Tombstone => println!("Deleted {id}; the delete syncs next cycle"),
    }
    Ok(())
}

/// Print the todo list, open items first.
pub async fn list(data_dir: &Path, home_id: &str) -> Result<()> {
    let todos = repository(data_dir, home_id).await?;
    let mut all = todos.get_all().await?;
    all.sort_by_key(|t| (t.fields.completed, t.fields.position));

    if all.is_empty() {
        println!("No todos.");
    }
    for todo in all {
        let mark = if todo.fields.completed { "x" } else { " " };
        let pending = if todo.meta.is_pending() { " *" } else { "" };
        println!("[{mark}] {}  {}{pending}", todo.id(), todo.fields.text);
    }
    Ok(())
}
