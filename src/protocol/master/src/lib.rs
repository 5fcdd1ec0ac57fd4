// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The master's RPC surface as plain types. Wire framing and transport live
//! outside this workspace; a transport decodes into [`Request`], hands it to
//! an [`Execute`] implementation, and encodes the returned [`Response`].
//! Requests the transport cannot decode never reach this layer and are
//! answered with [`Status::UnimplementedRequest`] there.

mod execute;
mod reject;
mod request;
mod response;
mod status;

pub use execute::Execute;
pub use reject::RejectRules;
pub use request::{BackupSource, Request};
pub use response::{MasterStats, Response};
pub use status::Status;
