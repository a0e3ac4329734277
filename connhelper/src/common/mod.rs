// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
pub mod dispatch;
pub mod errors;
pub mod helper;
pub mod process;
pub mod registry;
pub mod ssh;
