use std::path::Path;

use anyhow::{anyhow, bail, Result};
use async_compression::tokio::{
    bufread::{BzDecoder, GzipDecoder, XzDecoder},
    write::{GzipEncoder, XzEncoder},
};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_tar::{ArchiveBuilder, Builder};
use tracing::debug;

use crate::request::Compression;

async fn unpack_from<R>(reader: R, target_dir: &Path) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
{
    let mut archive = ArchiveBuilder::new(reader)
        .set_preserve_permissions(true)
        .set_ignore_zeros(true)
        .build();

    Ok(archive.unpack(target_dir).await?)
}

/// Unpacks a compressed tarball, choosing the decoder from the file content
/// rather than its extension.
pub async fn unpack(source_tar: &Path, target_dir: &Path) -> Result<()> {
    let kind = infer::get_from_path(source_tar)?
        .ok_or_else(|| anyhow!("unrecognized archive: {}", source_tar.display()))?;

    debug!("unpacking {} as {}", source_tar.display(), kind.mime_type());

    let reader = BufReader::new(File::open(source_tar).await?);

    match kind.mime_type() {
        "application/gzip" => unpack_from(GzipDecoder::new(reader), target_dir).await,
        "application/x-bzip2" => unpack_from(BzDecoder::new(reader), target_dir).await,
        "application/x-xz" => unpack_from(XzDecoder::new(reader), target_dir).await,
        other => bail!("unsupported archive type {} for {}", other, source_tar.display()),
    }
}

async fn compress_into<W>(encoder: W, source_dir: &Path, name: &Path) -> Result<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut builder = Builder::new(encoder);

    builder.follow_symlinks(false);
    builder.append_dir_all(name, source_dir).await?;

    let mut output = builder.into_inner().await?;

    output.shutdown().await?;

    Ok(())
}

/// Archives `source_dir` into `output_path`, storing entries under the
/// directory's own name.
pub async fn compress(
    source_dir: &Path,
    output_path: &Path,
    compression: Compression,
) -> Result<()> {
    let name = source_dir
        .file_name()
        .map(Path::new)
        .ok_or_else(|| anyhow!("cannot archive {}", source_dir.display()))?;

    let file = File::create(output_path).await?;

    match compression {
        Compression::Gz => compress_into(GzipEncoder::new(file), source_dir, name).await,
        Compression::Xz => compress_into(XzEncoder::new(file), source_dir, name).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn round_trip(compression: Compression) {
        let tmp = TempDir::new().unwrap();
        let install = tmp.path().join("arm-linux-gnueabi");

        std::fs::create_dir_all(install.join("bin")).unwrap();
        std::fs::write(install.join("bin/arm-linux-gnueabi-gcc"), "#!/bin/sh\n").unwrap();
        std::os::unix::fs::symlink("arm-linux-gnueabi-gcc", install.join("bin/cc")).unwrap();

        let archive = tmp.path().join(format!("out.{}", compression.extension()));
        compress(&install, &archive, compression).await.unwrap();

        let unpacked = tmp.path().join("unpacked");
        std::fs::create_dir(&unpacked).unwrap();
        unpack(&archive, &unpacked).await.unwrap();

        let gcc = unpacked.join("arm-linux-gnueabi/bin/arm-linux-gnueabi-gcc");
        assert_eq!(std::fs::read_to_string(gcc).unwrap(), "#!/bin/sh\n");

        let link = std::fs::read_link(unpacked.join("arm-linux-gnueabi/bin/cc")).unwrap();
        assert_eq!(link, Path::new("arm-linux-gnueabi-gcc"));
    }

    #[tokio::test]
    async fn gzip_archives_unpack_with_symlinks() {
        round_trip(Compression::Gz).await;
    }

    #[tokio::test]
    async fn xz_archives_unpack_with_symlinks() {
        round_trip(Compression::Xz).await;
    }

    #[tokio::test]
    async fn plain_files_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let bogus = tmp.path().join("bogus.tar.xz");
        std::fs::write(&bogus, "not an archive at all").unwrap();

        assert!(unpack(&bogus, tmp.path()).await.is_err());
    }
}
