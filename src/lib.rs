// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Server-side SSH public key authentication.
//!
//! Decides whether a client's public key may log in to an account, based on
//! the account's `authorized_keys` file, and verifies the signature that
//! binds the key to the session.

pub mod server;
pub mod shared;
pub mod utils;

pub use server::auth::{AuthSession, DecisionEngine, PublicKeyAuthenticator, Response};
pub use server::config::{PublicKeyAuthConfig, ServerFileConfig};
