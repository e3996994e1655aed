//! Per-user preferred projects and project groups.
//!
//! Replacing a user's groups is a replace-by-group reconciliation: the
//! membership of every group the request names by id is dropped and rebuilt
//! from the request, all inside one transaction. Unknown group ids become
//! new groups, unresolvable project references are skipped and reported.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::{PROJECT_COLUMNS, Storage, find_project, fmt_time, project_from_row};
use crate::cancel::CancellationToken;
use crate::models::{
    AppUser, DeleteOutcome, GroupSpec, GroupView, PreferenceView, ProjectDetails, ProjectGroup,
    ReplaceOutcome,
};
use crate::{Error, Result};

impl Storage {
    /// Replace the membership of the requested groups for `cookie`.
    pub fn replace_preferences(
        &mut self,
        cookie: &str,
        groups: &[GroupSpec],
        cancel: &CancellationToken,
    ) -> Result<ReplaceOutcome> {
        let user = self.get_user(cookie)?;
        for spec in groups {
            if spec.group_name.trim().is_empty() {
                return Err(Error::InvalidInput("group_name must not be empty".to_string()));
            }
        }

        let outcome = self.run_in_transaction("replace_preferences", cancel, |tx| {
            let claimed: BTreeSet<i64> = groups.iter().filter_map(GroupSpec::claimed_id).collect();
            for group_id in &claimed {
                tx.execute(
                    "DELETE FROM preferred_projects WHERE user_id = ?1 AND group_id = ?2",
                    params![user.id, group_id],
                )?;
            }

            let mut outcome = ReplaceOutcome::default();
            let now = fmt_time(&Utc::now());
            for spec in groups {
                cancel.checkpoint()?;
                let group = reconcile_group(tx, &user, spec)?;

                for ident in spec.unique_projects() {
                    match resolve_project_ident(tx, ident)? {
                        Some(project) => {
                            tx.execute(
                                "INSERT INTO preferred_projects (user_id, project_id, group_id, created_at)
                                 VALUES (?1, ?2, ?3, ?4)
                                 ON CONFLICT DO NOTHING",
                                params![user.id, project.id, group.group_id, now],
                            )?;
                        }
                        None => {
                            tracing::warn!(
                                group_id = group.group_id,
                                project = ident,
                                "skipping unresolvable project"
                            );
                            outcome.skipped_projects.push(ident.to_string());
                        }
                    }
                }

                outcome.groups.push(GroupView {
                    projects: group_projects(tx, group.group_id)?,
                    group_id: group.group_id,
                    group_name: group.group_name,
                });
            }

            Ok(outcome)
        })?;

        tracing::info!(
            groups = outcome.groups.len(),
            skipped = outcome.skipped_projects.len(),
            "replaced preferred project groups"
        );
        Ok(outcome)
    }

    /// Delete the given groups and their memberships for `cookie`.
    pub fn delete_preferences(
        &mut self,
        cookie: &str,
        group_ids: &[i64],
        cancel: &CancellationToken,
    ) -> Result<DeleteOutcome> {
        let user = self.get_user(cookie)?;
        let ids: BTreeSet<i64> = group_ids.iter().copied().filter(|id| *id != 0).collect();

        self.run_in_transaction("delete_preferences", cancel, |tx| {
            let mut outcome = DeleteOutcome::default();
            for group_id in &ids {
                outcome.memberships_deleted += tx.execute(
                    "DELETE FROM preferred_projects WHERE user_id = ?1 AND group_id = ?2",
                    params![user.id, group_id],
                )?;
            }
            cancel.checkpoint()?;
            for group_id in &ids {
                outcome.groups_deleted += tx.execute(
                    "DELETE FROM project_groups WHERE user_id = ?1 AND group_id = ?2",
                    params![user.id, group_id],
                )?;
            }
            Ok(outcome)
        })
    }

    /// Groups (by id) with their projects, plus ungrouped favourites.
    pub fn preferred_projects(&self, cookie: &str) -> Result<PreferenceView> {
        let user = self.get_user(cookie)?;

        let mut stmt = self.conn.prepare(
            "SELECT group_id, user_id, group_name FROM project_groups
             WHERE user_id = ?1 ORDER BY group_id",
        )?;
        let groups = stmt
            .query_map([user.id], group_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut views = Vec::with_capacity(groups.len());
        for group in groups {
            views.push(GroupView {
                projects: group_projects(&self.conn, group.group_id)?,
                group_id: group.group_id,
                group_name: group.group_name,
            });
        }

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM preferred_projects pp
             JOIN projects p ON p.id = pp.project_id
             WHERE pp.user_id = ?1 AND pp.group_id IS NULL
             ORDER BY p.name, p.id",
            PROJECT_COLUMNS
        ))?;
        let favourites = stmt
            .query_map([user.id], |row| project_from_row(row, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(PreferenceView {
            cookie: user.cookie,
            groups: views,
            favourites,
        })
    }

    /// Mark a project as an ungrouped favourite.
    pub fn add_favourite(&mut self, cookie: &str, project: &Uuid) -> Result<ProjectDetails> {
        let user = self.get_user(cookie)?;
        let project = self.get_project(project)?;

        let inserted = self.conn.execute(
            "INSERT INTO preferred_projects (user_id, project_id, group_id, created_at)
             VALUES (?1, ?2, NULL, ?3)
             ON CONFLICT DO NOTHING",
            params![user.id, project.id, fmt_time(&Utc::now())],
        )?;
        if inserted == 0 {
            return Err(Error::Conflict(format!("favourite '{}'", project.uuid)));
        }
        Ok(project)
    }

    /// Drop an ungrouped favourite.
    pub fn remove_favourite(&mut self, cookie: &str, project: &Uuid) -> Result<()> {
        let user = self.get_user(cookie)?;
        let project = self.get_project(project)?;

        let deleted = self.conn.execute(
            "DELETE FROM preferred_projects
             WHERE user_id = ?1 AND project_id = ?2 AND group_id IS NULL",
            params![user.id, project.id],
        )?;
        if deleted == 0 {
            return Err(Error::NotFound(format!("Favourite not found: {}", project.uuid)));
        }
        Ok(())
    }
}

fn group_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProjectGroup> {
    Ok(ProjectGroup {
        group_id: row.get(0)?,
        user_id: row.get(1)?,
        group_name: row.get(2)?,
    })
}

/// Find the user's claimed group or create a new one; the stored name
/// follows the request either way.
fn reconcile_group(conn: &Connection, user: &AppUser, spec: &GroupSpec) -> Result<ProjectGroup> {
    let name = spec.group_name.trim();

    if let Some(group_id) = spec.claimed_id() {
        let existing = conn
            .query_row(
                "SELECT group_id, user_id, group_name FROM project_groups
                 WHERE user_id = ?1 AND group_id = ?2",
                params![user.id, group_id],
                group_from_row,
            )
            .optional()?;

        match existing {
            Some(mut group) => {
                if group.group_name != name {
                    conn.execute(
                        "UPDATE project_groups SET group_name = ?1 WHERE group_id = ?2",
                        params![name, group.group_id],
                    )?;
                    group.group_name = name.to_string();
                }
                tracing::debug!(group_id, "reusing project group");
                return Ok(group);
            }
            None => {
                tracing::debug!(group_id, "unknown project group, creating a new one");
            }
        }
    }

    conn.execute(
        "INSERT INTO project_groups (user_id, group_name) VALUES (?1, ?2)",
        params![user.id, name],
    )?;
    let group = ProjectGroup {
        group_id: conn.last_insert_rowid(),
        user_id: user.id,
        group_name: name.to_string(),
    };
    tracing::debug!(group_id = group.group_id, "created project group");
    Ok(group)
}

/// Resolve a project reference, which is a project UUID or an exact name.
fn resolve_project_ident(conn: &Connection, ident: &str) -> Result<Option<ProjectDetails>> {
    if let Ok(uuid) = Uuid::parse_str(ident) {
        return find_project(conn, &uuid);
    }
    let project = conn
        .query_row(
            &format!("SELECT {} FROM projects p WHERE p.name = ?1", PROJECT_COLUMNS),
            [ident],
            |row| project_from_row(row, 0),
        )
        .optional()?;
    Ok(project)
}

fn group_projects(conn: &Connection, group_id: i64) -> Result<Vec<ProjectDetails>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM preferred_projects pp
         JOIN projects p ON p.id = pp.project_id
         WHERE pp.group_id = ?1
         ORDER BY p.name, p.id",
        PROJECT_COLUMNS
    ))?;
    let projects = stmt
        .query_map([group_id], |row| project_from_row(row, 0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(projects)
}
