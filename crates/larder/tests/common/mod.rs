// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Helpers shared by the integration tests.

pub fn block_on<F: Future>(f: F) -> F::Output {
    futures::executor::block_on(f)
}
