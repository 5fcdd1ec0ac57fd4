// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

/// Executes fully parsed requests against some storage, producing the
/// response the transport will send back.
pub trait Execute<Request, Response> {
    fn execute(&mut self, request: Request) -> Response;
}
