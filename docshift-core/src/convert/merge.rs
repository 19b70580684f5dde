//! Concatenate PDFs in upload order.

use super::{blocking, pdf, ConversionReport};
use crate::error::{ConvertError, Result};
use crate::job::{ConversionJob, OutputFile};
use oxidize_pdf::operations::{merge_pdfs, MergeInput, MergeOptions};
use serde::Serialize;
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Serialize)]
struct MergeInfo {
    files_merged: usize,
    total_pages: usize,
    output_size: u64,
}

pub(crate) async fn run(job: &mut ConversionJob) -> Result<ConversionReport> {
    let inputs: Vec<(PathBuf, String)> = job
        .inputs()
        .iter()
        .map(|f| (f.stored_path.clone(), f.original_name.clone()))
        .collect();
    if inputs.len() < 2 {
        return Err(ConvertError::TooFewFiles {
            required: 2,
            actual: inputs.len(),
        });
    }

    let output = job.reserve_output("merged.pdf");
    let target = output.clone();
    let (files_merged, total_pages) = blocking(move || {
        // Open every input first so a bad file is reported by name.
        let mut expected_pages = 0;
        for (path, name) in &inputs {
            let pages = pdf::page_count(path, name)?;
            debug!(file = %name, pages, "merge input");
            expected_pages += pages;
        }

        let merge_inputs = inputs.iter().map(|(path, _)| MergeInput::new(path.clone())).collect();
        merge_pdfs(merge_inputs, &target, MergeOptions::default())
            .map_err(|e| ConvertError::Conversion(format!("Failed to merge PDFs: {e}")))?;

        let total_pages = pdf::page_count(&target, "merged.pdf")?;
        if total_pages != expected_pages {
            return Err(ConvertError::Conversion(format!(
                "merged document has {total_pages} pages, expected {expected_pages}"
            )));
        }
        Ok((inputs.len(), total_pages))
    })
    .await?;

    let output_size = tokio::fs::metadata(&output).await?.len();
    job.add_output(OutputFile {
        path: output,
        download_name: "merged.pdf".to_string(),
        mime_type: "application/pdf".to_string(),
    });

    let info = MergeInfo {
        files_merged,
        total_pages,
        output_size,
    };
    let info = serde_json::to_string(&info).map_err(|e| ConvertError::Internal(e.to_string()))?;
    Ok(ConversionReport::default().with_header("X-Merge-Info", info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::pdf::fixtures::write_pdf;
    use crate::convert::Operation;
    use crate::upload::UploadedFile;

    async fn job_with_pdfs(root: &std::path::Path, page_counts: &[usize]) -> ConversionJob {
        let mut job = ConversionJob::create(root, Operation::Merge).await.unwrap();
        for (i, pages) in page_counts.iter().enumerate() {
            let name = format!("part{i}.pdf");
            let path = job.stage_input(&name);
            let tag = ["AAA", "BBB", "CCC"][i % 3];
            let labels: Vec<String> = (1..=*pages).map(|n| format!("{tag} {n}")).collect();
            let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
            write_pdf(&path, &labels);
            let size_bytes = std::fs::metadata(&path).unwrap().len();
            job.add_input(UploadedFile {
                original_name: name,
                stored_path: path,
                size_bytes,
                declared_mime_type: "application/pdf".into(),
            });
        }
        job
    }

    #[tokio::test]
    async fn merges_all_pages_in_order() {
        let root = tempfile::tempdir().unwrap();
        let mut job = job_with_pdfs(root.path(), &[2, 3]).await;

        let report = run(&mut job).await.unwrap();

        let output = &job.outputs()[0];
        assert_eq!(output.download_name, "merged.pdf");
        assert_eq!(pdf::page_count(&output.path, "merged.pdf").unwrap(), 5);

        let texts = pdf::page_texts(&output.path, "merged.pdf").unwrap();
        let expected = ["AAA 1", "AAA 2", "BBB 1", "BBB 2", "BBB 3"];
        assert_eq!(texts.len(), expected.len());
        for (text, label) in texts.iter().zip(expected) {
            assert!(text.contains(label), "expected {label:?}, page text was {text:?}");
        }

        let info: serde_json::Value = serde_json::from_str(report.header("X-Merge-Info").unwrap()).unwrap();
        assert_eq!(info["files_merged"], 2);
        assert_eq!(info["total_pages"], 5);
    }

    #[tokio::test]
    async fn single_input_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let mut job = job_with_pdfs(root.path(), &[1]).await;
        let err = run(&mut job).await.unwrap_err();
        assert!(matches!(err, ConvertError::TooFewFiles { required: 2, actual: 1 }));
    }
}
