//! Group identity reconciliation between host and guest.
//!
//! Device access inside the guest relies on the guest's group ids matching
//! the host's for a fixed list of groups. Reconciliation is planned purely
//! from the two parsed group databases, then applied through the guest's
//! own `groupmod`/`groupadd` so membership is preserved.

use std::collections::BTreeSet;
use std::path::Path;

use rootlet_common::constants::GROUP_SYNC_PAIRS;
use rootlet_common::error::{Result, RootletError};

use crate::guest::GuestContext;

/// One entry of a group database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    /// Group name.
    pub name: String,
    /// Numeric group id.
    pub gid: u32,
}

/// Parses a group-format database (`name:passwd:gid:members`).
#[must_use]
pub fn parse_group_db(content: &str) -> Vec<GroupEntry> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() < 3 {
                return None;
            }
            Some(GroupEntry {
                name: fields[0].to_owned(),
                gid: fields[2].parse().ok()?,
            })
        })
        .collect()
}

/// A single reconciliation step inside the guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupAction {
    /// Move an unrelated guest group off the target gid to make room.
    Renumber {
        /// Group currently squatting on the gid.
        name: String,
        /// Next free gid above the target.
        to: u32,
    },
    /// Renumber the target guest group to the host's gid.
    SetGid {
        /// Guest group to renumber.
        name: String,
        /// Host gid to assign.
        gid: u32,
    },
    /// Create the guest group with the host's gid.
    Create {
        /// Guest group name.
        name: String,
        /// Host gid to assign.
        gid: u32,
    },
    /// Create an unassociated system group; the host has no such group.
    CreateSystem {
        /// Guest group name.
        name: String,
    },
}

fn next_free_gid(taken: &BTreeSet<u32>, above: u32) -> u32 {
    let mut candidate = above + 1;
    while taken.contains(&candidate) {
        candidate += 1;
    }
    candidate
}

/// Plans the reconciliation steps for the fixed pair list.
#[must_use]
pub fn plan(
    host: &[GroupEntry],
    guest: &[GroupEntry],
    pairs: &[(&str, &str)],
) -> Vec<GroupAction> {
    let mut actions = Vec::new();
    let mut taken: BTreeSet<u32> = guest.iter().map(|g| g.gid).collect();
    let mut guest_gids: Vec<GroupEntry> = guest.to_vec();

    for (host_name, guest_name) in pairs {
        let host_gid = host.iter().find(|g| g.name == *host_name).map(|g| g.gid);
        let guest_entry = guest_gids.iter().find(|g| g.name == *guest_name).cloned();

        let Some(host_gid) = host_gid else {
            if guest_entry.is_none() {
                actions.push(GroupAction::CreateSystem {
                    name: (*guest_name).to_owned(),
                });
            }
            continue;
        };

        if guest_entry.as_ref().is_some_and(|g| g.gid == host_gid) {
            continue;
        }

        // Another guest group already holds the target gid: bump it to the
        // next unused id above the target before assigning.
        if let Some(squatter) = guest_gids
            .iter()
            .find(|g| g.gid == host_gid && g.name != *guest_name)
            .cloned()
        {
            let to = next_free_gid(&taken, host_gid);
            let _ = taken.insert(to);
            for g in &mut guest_gids {
                if g.name == squatter.name {
                    g.gid = to;
                }
            }
            actions.push(GroupAction::Renumber {
                name: squatter.name,
                to,
            });
        }

        let _ = taken.insert(host_gid);
        match guest_entry {
            Some(entry) => {
                for g in &mut guest_gids {
                    if g.name == entry.name {
                        g.gid = host_gid;
                    }
                }
                actions.push(GroupAction::SetGid {
                    name: (*guest_name).to_owned(),
                    gid: host_gid,
                });
            }
            None => {
                guest_gids.push(GroupEntry {
                    name: (*guest_name).to_owned(),
                    gid: host_gid,
                });
                actions.push(GroupAction::Create {
                    name: (*guest_name).to_owned(),
                    gid: host_gid,
                });
            }
        }
    }

    actions
}

/// Synchronizes the fixed group list from host to guest.
pub struct IdentityReconciler<'a> {
    ctx: &'a GuestContext,
}

impl<'a> IdentityReconciler<'a> {
    /// Creates a reconciler over the guest context.
    #[must_use]
    pub const fn new(ctx: &'a GuestContext) -> Self {
        Self { ctx }
    }

    /// Reads both databases, plans, and applies. One group's failure is a
    /// warning; the remaining actions still run.
    ///
    /// # Errors
    ///
    /// Returns an error only when the guest group database is unreadable.
    pub fn reconcile(&self) -> Result<()> {
        let host = read_group_db(Path::new("/etc/group"))?;
        let guest = read_group_db(&self.ctx.root().join("etc/group"))?;

        for action in plan(&host, &guest, GROUP_SYNC_PAIRS) {
            if let Err(e) = self.apply(&action) {
                tracing::warn!(?action, error = %e, "group reconciliation step failed");
            }
        }
        Ok(())
    }

    fn apply(&self, action: &GroupAction) -> Result<()> {
        tracing::debug!(?action, "applying group action");
        let mut cmd = match action {
            GroupAction::Renumber { name, to } | GroupAction::SetGid { name, gid: to } => {
                let mut c = self.ctx.command("groupmod");
                let _ = c.args(["-g", &to.to_string(), name]);
                c
            }
            GroupAction::Create { name, gid } => {
                let mut c = self.ctx.command("groupadd");
                let _ = c.args(["-g", &gid.to_string(), name]);
                c
            }
            GroupAction::CreateSystem { name } => {
                let mut c = self.ctx.command("groupadd");
                let _ = c.args(["-r", name]);
                c
            }
        };

        let status = cmd.status().map_err(|e| RootletError::Exec {
            program: "groupmod/groupadd".into(),
            source: e,
        })?;
        if !status.success() {
            return Err(RootletError::Exec {
                program: "groupmod/groupadd".into(),
                source: std::io::Error::other(format!("exited with {status}")),
            });
        }
        Ok(())
    }
}

fn read_group_db(path: &Path) -> Result<Vec<GroupEntry>> {
    let content = std::fs::read_to_string(path).map_err(|e| RootletError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(parse_group_db(&content))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(pairs: &[(&str, u32)]) -> Vec<GroupEntry> {
        pairs
            .iter()
            .map(|(name, gid)| GroupEntry {
                name: (*name).to_owned(),
                gid: *gid,
            })
            .collect()
    }

    const PAIRS: &[(&str, &str)] = &[("video", "video")];

    #[test]
    fn matching_gids_are_a_no_op() {
        let host = entries(&[("video", 44)]);
        let guest = entries(&[("video", 44)]);
        assert!(plan(&host, &guest, PAIRS).is_empty());
    }

    #[test]
    fn guest_group_is_renumbered_to_host_gid() {
        let host = entries(&[("video", 44)]);
        let guest = entries(&[("video", 988)]);
        assert_eq!(
            plan(&host, &guest, PAIRS),
            vec![GroupAction::SetGid {
                name: "video".into(),
                gid: 44
            }]
        );
    }

    #[test]
    fn squatter_is_bumped_before_assignment() {
        let host = entries(&[("video", 44)]);
        let guest = entries(&[("video", 988), ("scanner", 44), ("lp", 45)]);
        assert_eq!(
            plan(&host, &guest, PAIRS),
            vec![
                GroupAction::Renumber {
                    name: "scanner".into(),
                    // 45 is taken by lp, so the next unused id above 44 is 46.
                    to: 46
                },
                GroupAction::SetGid {
                    name: "video".into(),
                    gid: 44
                }
            ]
        );
    }

    #[test]
    fn missing_guest_group_is_created_with_host_gid() {
        let host = entries(&[("video", 44)]);
        let guest = entries(&[("audio", 29)]);
        assert_eq!(
            plan(&host, &guest, PAIRS),
            vec![GroupAction::Create {
                name: "video".into(),
                gid: 44
            }]
        );
    }

    #[test]
    fn absent_host_group_creates_unassociated_system_group() {
        let host = entries(&[]);
        let guest = entries(&[]);
        assert_eq!(
            plan(&host, &guest, PAIRS),
            vec![GroupAction::CreateSystem {
                name: "video".into()
            }]
        );
    }

    #[test]
    fn absent_host_group_with_existing_guest_group_is_a_no_op() {
        let host = entries(&[]);
        let guest = entries(&[("video", 988)]);
        assert!(plan(&host, &guest, PAIRS).is_empty());
    }

    #[test]
    fn differing_guest_name_pair_maps_names() {
        let host = entries(&[("serial", 20)]);
        let guest = entries(&[("dialout", 20)]);
        assert!(plan(&host, &guest, &[("serial", "dialout")]).is_empty());
    }

    #[test]
    fn parse_group_db_skips_malformed_lines() {
        let db = "video:x:44:\nbroken\naudio:x:29:alice,bob\n";
        let parsed = parse_group_db(db);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].name, "audio");
        assert_eq!(parsed[1].gid, 29);
    }
}
