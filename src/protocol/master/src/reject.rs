// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::Status;

use serde::{Deserialize, Serialize};

/// Conditions under which an operation must be rejected, evaluated against
/// the current version of the target object. The rules are independent
/// predicates with a fixed precedence; the first match wins.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectRules {
    /// Reject if the object does not exist.
    pub doesnt_exist: bool,
    /// Reject if the object exists.
    pub exists: bool,
    /// Reject if the live version is `<= given_version`.
    pub version_le_given: bool,
    /// Reject if the live version is `!= given_version`.
    pub version_ne_given: bool,
    pub given_version: u64,
}

impl RejectRules {
    /// Rules rejecting an existing object; used for create-style writes so a
    /// race loses loudly instead of silently overwriting.
    pub fn reject_exists() -> Self {
        Self {
            exists: true,
            ..Self::default()
        }
    }

    /// Evaluate the rules against an object's live version, `None` when the
    /// object does not exist.
    ///
    /// Precedence: a missing object triggers only `doesnt_exist`; an
    /// existing object triggers `exists` first, then `version_le_given`,
    /// then `version_ne_given`.
    pub fn check(&self, version: Option<u64>) -> Result<(), Status> {
        let Some(version) = version else {
            if self.doesnt_exist {
                return Err(Status::ObjectDoesntExist);
            }
            return Ok(());
        };
        if self.exists {
            return Err(Status::ObjectExists);
        }
        if self.version_le_given && version <= self.given_version {
            return Err(Status::WrongVersion);
        }
        if self.version_ne_given && version != self.given_version {
            return Err(Status::WrongVersion);
        }
        Ok(())
    }
}
