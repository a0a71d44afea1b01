//! The fixed stage sequence of a toolchain build.

use super::Stage;

mod clean;
mod environment;
mod package;
mod patches;
mod sources;
mod toolchain;
mod tools;

pub use clean::Clean;
pub use environment::Environment;
pub use package::{Package, Report};
pub use patches::Patches;
pub use sources::{Download, Extract, Update};
pub use toolchain::{Binutils, GccStage1, GccStage2, Glibc, Headers};
pub use tools::Tools;

pub fn standard() -> Vec<Box<dyn Stage>> {
    let mut stages: Vec<Box<dyn Stage>> = vec![
        Box::new(Clean),
        Box::new(Tools),
        Box::new(Download),
        Box::new(Extract),
        Box::new(Update),
        Box::new(Patches),
    ];

    stages.extend(build());
    stages.push(Box::new(Package));
    stages.push(Box::new(Report));

    stages
}

/// Stages that configure and compile, after sources are in place.
pub fn build() -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(Environment),
        Box::new(Binutils),
        Box::new(Headers),
        Box::new(GccStage1),
        Box::new(Glibc),
        Box::new(GccStage2),
    ]
}
