// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of notespace.
//
// notespace is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// notespace is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with notespace.  If not,
// see <http://www.gnu.org/licenses/>.

//! # notespace metrics
//!
//! notespace uses [OpenTelemetry] for metrics. OTel advises re-using instruments rather than
//! creating them on each use, which raises the question of where to keep them. Rather than hang
//! dozens of `Counter<u64>` fields off the application state, each instrument is declared as a
//! lazily-initialized static right next to the code that increments it:
//!
//! [OpenTelemetry]: https://docs.rs/opentelemetry/latest/opentelemetry/index.html
//!
//! ```ignore
//! define_metric! { "files.uploads.successful", files_uploads_successful, Sort::IntegralCounter }
//! // ...
//! files_uploads_successful.add(1, &[]);
//! ```
//!
//! That leaves the problem of two call sites accidentally choosing the same metric name. Each
//! [define_metric] invocation also registers its name with David Tolnay's [inventory] crate, and
//! [check_metric_names] (called once at startup) panics if any name appears twice.
//!
//! The statics resolve their meter through [opentelemetry::global], so the meter provider must be
//! installed (see [crate::server::init_telemetry]) before the first increment for the count to be
//! exported.

use std::collections::HashSet;

/// Instrument type
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Sort {
    /// Corresponds to `Counter<u64>`
    IntegralCounter,
}

/// The type of thing being inventoried
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Registration {
    name: &'static str,
    sort: Sort,
}

impl Registration {
    pub const fn new(name: &'static str, sort: Sort) -> Registration {
        Registration { name, sort }
    }
    pub fn name(&self) -> &'static str {
        self.name
    }
    pub fn sort(&self) -> Sort {
        self.sort
    }
}

inventory::collect!(Registration);

/// Panic if two metrics were registered under the same name
pub fn check_metric_names() {
    let mut names: HashSet<&'static str> = HashSet::new();
    inventory::iter::<Registration>.into_iter().for_each(|reg| {
        if !names.insert(reg.name()) {
            panic!("The metric name {} was used twice", reg.name());
        }
    });
}

/// Declare & register an OTel instrument
///
/// `define_metric! { "name", ident, Sort::IntegralCounter }` defines a static `ident` of type
/// `Counter<u64>` named "name" on the "notespace" meter. The sort is evaluated where the macro is
/// invoked, so [Sort] needs to be in scope there.
#[macro_export]
macro_rules! define_metric {
    ($name:literal, $ident:ident, $sort:expr) => {
        inventory::submit! {
            $crate::metrics::Registration::new($name, $sort)
        }
        lazy_static::lazy_static! {
            #[allow(non_upper_case_globals)]
            static ref $ident: opentelemetry::metrics::Counter<u64> =
                opentelemetry::global::meter("notespace").u64_counter($name).build();
        }
    };
}

#[cfg(test)]
mod test {
    use super::*;

    define_metric! { "test.metrics.registered", test_metrics_registered, Sort::IntegralCounter }

    #[test]
    fn registration() {
        check_metric_names();
        assert!(
            inventory::iter::<Registration>
                .into_iter()
                .any(|reg| reg.name() == "test.metrics.registered"
                    && reg.sort() == Sort::IntegralCounter)
        );
        // With no provider installed this goes to the no-op meter
        test_metrics_registered.add(1, &[]);
    }
}
