//! Configure and make steps for the toolchain components.
//!
//! A cross build goes binutils, kernel headers, a C-only first compiler,
//! glibc bootstrapped with that compiler, then the full compiler. A host
//! build only needs binutils and the full compiler.

use async_trait::async_trait;
use tokio::fs;

use crate::pipeline::{BuildContext, Stage, StageError, StageResult};
use crate::process::Invocation;
use crate::resolver::DependencyKind;
use crate::store::BuildDir;

const LANGUAGES: &str = "--enable-languages=c,c++";

/// Flags shared by the binutils and gcc configure steps.
fn common_flags(ctx: &BuildContext) -> Vec<String> {
    let mut flags = vec![format!("--prefix={}", ctx.layout.install().display())];

    if !ctx.plan.native {
        flags.push(format!("--target={}", ctx.plan.target));
    }

    flags.extend(
        ["--disable-multilib", "--disable-nls", "--disable-werror"]
            .iter()
            .map(|flag| flag.to_string()),
    );

    flags
}

fn configure_gcc(ctx: &BuildContext) -> Invocation {
    ctx.configure(DependencyKind::Gcc, BuildDir::Gcc)
        .args(common_flags(ctx))
        .arg(LANGUAGES)
}

pub struct Binutils;

#[async_trait]
impl Stage for Binutils {
    fn name(&self) -> &'static str {
        "binutils"
    }

    async fn run(&self, ctx: &BuildContext) -> StageResult {
        let stage = self.name();
        let dir = ctx.build_dir(BuildDir::Binutils);

        ctx.require(stage, "binutils source", &ctx.source(DependencyKind::Binutils))?;

        ctx.exec(
            stage,
            ctx.configure(DependencyKind::Binutils, BuildDir::Binutils)
                .args(common_flags(ctx)),
        )
        .await?;
        ctx.exec(stage, ctx.make(&dir)).await?;
        ctx.exec(stage, ctx.make_install(&dir).arg("install")).await
    }
}

/// Installs the kernel's userspace headers into the target sysroot.
pub struct Headers;

#[async_trait]
impl Stage for Headers {
    fn name(&self) -> &'static str {
        "headers"
    }

    fn applies(&self, ctx: &BuildContext) -> bool {
        !ctx.plan.native && ctx.plan.kernel_arch.is_some()
    }

    async fn run(&self, ctx: &BuildContext) -> StageResult {
        let stage = self.name();
        let linux = ctx.source(DependencyKind::Linux);

        let Some(arch) = ctx.plan.kernel_arch else {
            return Ok(());
        };

        ctx.require(stage, "linux source", &linux)?;

        ctx.exec(
            stage,
            Invocation::new("make")
                .arg(format!("ARCH={arch}"))
                .arg(format!(
                    "INSTALL_HDR_PATH={}",
                    ctx.layout.sysroot().display()
                ))
                .arg("headers_install")
                .current_dir(&linux)
                .envs(&ctx.env()),
        )
        .await
    }
}

/// Compiler driver only, enough to build the C library.
pub struct GccStage1;

#[async_trait]
impl Stage for GccStage1 {
    fn name(&self) -> &'static str {
        "gcc-stage1"
    }

    fn applies(&self, ctx: &BuildContext) -> bool {
        !ctx.plan.native
    }

    async fn run(&self, ctx: &BuildContext) -> StageResult {
        let stage = self.name();
        let dir = ctx.build_dir(BuildDir::Gcc);

        ctx.require(stage, "gcc source", &ctx.source(DependencyKind::Gcc))?;
        ctx.require(stage, "target assembler", &ctx.tool("as"))?;

        ctx.exec(stage, configure_gcc(ctx)).await?;
        ctx.exec(stage, ctx.make(&dir).arg("all-gcc")).await?;
        ctx.exec(stage, ctx.make_install(&dir).arg("install-gcc")).await
    }
}

pub struct Glibc;

impl Glibc {
    const NAME: &'static str = "glibc";

    fn configure(&self, ctx: &BuildContext, build: &str) -> Invocation {
        let sysroot = ctx.layout.sysroot();
        let target = &ctx.plan.target;

        ctx.configure(DependencyKind::Glibc, BuildDir::Glibc).args([
            format!("--prefix={}", sysroot.display()),
            format!("--build={build}"),
            format!("--host={target}"),
            format!("--target={target}"),
            format!("--with-headers={}", sysroot.join("include").display()),
            "--disable-multilib".to_string(),
            "--disable-werror".to_string(),
            "libc_cv_forced_unwind=yes".to_string(),
        ])
    }

    /// Start files and an empty `libc.so` so libgcc can link.
    async fn bootstrap(&self, ctx: &BuildContext) -> StageResult {
        let dir = ctx.build_dir(BuildDir::Glibc);
        let sysroot = ctx.layout.sysroot();
        let lib = sysroot.join("lib");

        ctx.exec(
            Self::NAME,
            ctx.make_install(&dir)
                .arg("install-bootstrap-headers=yes")
                .arg("install-headers"),
        )
        .await?;
        ctx.exec(Self::NAME, ctx.make(&dir).arg("csu/subdir_lib"))
            .await?;

        fs::create_dir_all(&lib)
            .await
            .map_err(StageError::io(Self::NAME, format!("cannot create {}", lib.display())))?;

        ctx.exec(
            Self::NAME,
            Invocation::new("install")
                .args(["csu/crt1.o", "csu/crti.o", "csu/crtn.o"])
                .arg(lib.display().to_string())
                .current_dir(&dir)
                .envs(&ctx.env()),
        )
        .await?;

        ctx.exec(
            Self::NAME,
            Invocation::new(ctx.tool("gcc").display().to_string())
                .args(["-nostdlib", "-nostartfiles", "-shared", "-x", "c", "/dev/null"])
                .arg("-o")
                .arg(lib.join("libc.so").display().to_string())
                .current_dir(&dir)
                .envs(&ctx.env()),
        )
        .await?;

        let stubs = sysroot.join("include/gnu/stubs.h");
        let gnu = sysroot.join("include/gnu");

        fs::create_dir_all(&gnu)
            .await
            .map_err(StageError::io(Self::NAME, format!("cannot create {}", gnu.display())))?;
        fs::write(&stubs, "")
            .await
            .map_err(StageError::io(Self::NAME, format!("cannot write {}", stubs.display())))
    }
}

#[async_trait]
impl Stage for Glibc {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn applies(&self, ctx: &BuildContext) -> bool {
        !ctx.plan.native
    }

    async fn run(&self, ctx: &BuildContext) -> StageResult {
        let glibc_dir = ctx.build_dir(BuildDir::Glibc);
        let gcc_dir = ctx.build_dir(BuildDir::Gcc);
        let source = ctx.source(DependencyKind::Glibc);

        ctx.require(Self::NAME, "glibc source", &source)?;
        ctx.require(Self::NAME, "first stage compiler", &ctx.tool("gcc"))?;
        ctx.require(
            Self::NAME,
            "kernel headers",
            &ctx.layout.sysroot().join("include/linux"),
        )?;

        let build = ctx
            .capture(
                Self::NAME,
                Invocation::new(source.join("scripts/config.guess").display().to_string()),
            )
            .await?;

        ctx.exec(Self::NAME, self.configure(ctx, build.trim())).await?;

        self.bootstrap(ctx).await?;

        ctx.exec(Self::NAME, ctx.make(&gcc_dir).arg("all-target-libgcc"))
            .await?;
        ctx.exec(
            Self::NAME,
            ctx.make_install(&gcc_dir).arg("install-target-libgcc"),
        )
        .await?;

        ctx.exec(Self::NAME, ctx.make(&glibc_dir)).await?;
        ctx.exec(Self::NAME, ctx.make_install(&glibc_dir).arg("install"))
            .await
    }
}

/// The full compiler with its runtime libraries.
pub struct GccStage2;

#[async_trait]
impl Stage for GccStage2 {
    fn name(&self) -> &'static str {
        "gcc-stage2"
    }

    async fn run(&self, ctx: &BuildContext) -> StageResult {
        let stage = self.name();
        let dir = ctx.build_dir(BuildDir::Gcc);

        if ctx.plan.native {
            ctx.require(stage, "gcc source", &ctx.source(DependencyKind::Gcc))?;
            ctx.require(stage, "linker", &ctx.tool("ld"))?;
            ctx.exec(stage, configure_gcc(ctx)).await?;
        } else {
            ctx.require(
                stage,
                "C library",
                &ctx.layout.sysroot().join("lib/libc.so"),
            )?;
        }

        ctx.exec(stage, ctx.make(&dir)).await?;
        ctx.exec(stage, ctx.make_install(&dir).arg("install")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing;
    use crate::process::testing::RecordingRunner;
    use crate::request::{Arch, BuildRequest, Flavor};
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn seed(ctx: &BuildContext, kind: DependencyKind) {
        let tree = ctx.source(kind);
        std::fs::create_dir_all(&tree).unwrap();
        std::fs::write(tree.join("configure"), "#!/bin/sh\n").unwrap();
    }

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "tool\n").unwrap();
    }

    #[tokio::test]
    async fn cross_binutils_configures_for_the_target() {
        let tmp = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::default());
        let ctx = testing::context(tmp.path(), runner.clone());

        seed(&ctx, DependencyKind::Binutils);
        Binutils.run(&ctx).await.unwrap();

        let root = tmp.path().display();
        assert_eq!(
            runner.commands(),
            vec![
                format!(
                    "{root}/binutils/configure --prefix={root}/aarch64-linux-gnu \
                     --target=aarch64-linux-gnu --disable-multilib --disable-nls \
                     --disable-werror"
                ),
                "make -j4".to_string(),
                "make install".to_string(),
            ]
        );

        let calls = runner.calls();
        assert!(calls
            .iter()
            .all(|call| call.cwd.as_deref() == Some(&*ctx.build_dir(BuildDir::Binutils))));

        let path = calls[1]
            .envs
            .iter()
            .find(|(key, _)| key == "PATH")
            .map(|(_, value)| value.clone())
            .unwrap();
        assert!(path.starts_with(&format!("{root}/aarch64-linux-gnu/bin:")));
    }

    #[tokio::test]
    async fn host_builds_skip_the_bootstrap_stages() {
        let tmp = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::default());

        let request = BuildRequest::new(Arch::Host, Flavor::Gnu, 8);
        let ctx = testing::context_for(tmp.path(), request, runner.clone());

        assert!(!Headers.applies(&ctx));
        assert!(!GccStage1.applies(&ctx));
        assert!(!Glibc.applies(&ctx));

        seed(&ctx, DependencyKind::Gcc);
        touch(&ctx.tool("ld"));

        GccStage2.run(&ctx).await.unwrap();

        let commands = runner.commands();
        assert_eq!(commands.len(), 3);
        assert!(!commands[0].contains("--target="));
        assert!(commands[0].ends_with(LANGUAGES));
    }

    #[tokio::test]
    async fn headers_install_into_the_sysroot() {
        let tmp = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::default());

        let request = BuildRequest::new(Arch::Arm, Flavor::Linaro, 6);
        let ctx = testing::context_for(tmp.path(), request, runner.clone());

        seed(&ctx, DependencyKind::Linux);
        Headers.run(&ctx).await.unwrap();

        assert_eq!(
            runner.commands(),
            vec![format!(
                "make ARCH=arm INSTALL_HDR_PATH={} headers_install",
                ctx.layout.sysroot().display()
            )]
        );
    }

    #[tokio::test]
    async fn first_compiler_needs_binutils() {
        let tmp = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::default());
        let ctx = testing::context(tmp.path(), runner.clone());

        seed(&ctx, DependencyKind::Gcc);
        let err = GccStage1.run(&ctx).await.unwrap_err();

        assert!(matches!(
            err,
            StageError::MissingArtifact { stage: "gcc-stage1", .. }
        ));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn glibc_bootstraps_against_the_first_compiler() {
        let tmp = TempDir::new().unwrap();
        let runner = Arc::new(
            RecordingRunner::default().with_stdout("", "x86_64-pc-linux-gnu\n"),
        );
        let ctx = testing::context(tmp.path(), runner.clone());

        seed(&ctx, DependencyKind::Glibc);
        touch(&ctx.tool("gcc"));
        touch(&ctx.layout.sysroot().join("include/linux/version.h"));

        Glibc.run(&ctx).await.unwrap();

        let commands = runner.commands();
        let sysroot = ctx.layout.sysroot();

        assert!(commands[1].contains("--build=x86_64-pc-linux-gnu --host=aarch64-linux-gnu"));
        assert!(commands
            .iter()
            .any(|c| c.ends_with(&format!("-o {}", sysroot.join("lib/libc.so").display()))));
        assert_eq!(commands.last().unwrap(), "make install");
        assert!(sysroot.join("include/gnu/stubs.h").is_file());
        assert!(sysroot.join("lib").is_dir());
    }

    #[tokio::test]
    async fn final_cross_compiler_needs_the_c_library() {
        let tmp = TempDir::new().unwrap();
        let ctx = testing::context(tmp.path(), Arc::new(RecordingRunner::default()));

        let err = GccStage2.run(&ctx).await.unwrap_err();

        assert_eq!(
            err.to_string(),
            format!(
                "[gcc-stage2] missing C library: {}",
                ctx.layout.sysroot().join("lib/libc.so").display()
            )
        );
    }
}
