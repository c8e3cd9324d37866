// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

//! Worked-problem Q&A composer service: turns a worked solution into
//! verified calculation code, randomised runs and exam question sets.

pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod session;
pub mod state;
pub mod store;
pub mod telemetry;

pub use config::AppConfig;
pub use http::build_router;
pub use state::AppState;
