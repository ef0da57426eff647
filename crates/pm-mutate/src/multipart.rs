use bytes::Bytes;

use crate::error::Error;
use crate::json::Mutator;

/// One parsed multipart/form-data part. Both ordinary fields and file parts
/// are represented uniformly; `filename`/`content_type` are `None` for
/// ordinary fields.
#[derive(Debug, Clone)]
pub struct MultipartField {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

async fn parse_multipart(body: Bytes, boundary: &str) -> Result<Vec<MultipartField>, Error> {
    let stream = futures::stream::once(async move { Ok::<Bytes, std::io::Error>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);
    let mut fields = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Multipart { message: e.to_string() })?
    {
        let name = field.name().unwrap_or_default().to_string();
        let filename = field.file_name().map(|s| s.to_string());
        let content_type = field.content_type().map(|m| m.to_string());
        let data = field
            .bytes()
            .await
            .map_err(|e| Error::Multipart { message: e.to_string() })?;
        fields.push(MultipartField {
            name,
            filename,
            content_type,
            data,
        });
    }
    Ok(fields)
}

fn render_multipart(fields: &[MultipartField], boundary: &str) -> Vec<u8> {
    let mut out = Vec::new();
    for field in fields {
        out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        let mut disposition = format!("Content-Disposition: form-data; name=\"{}\"", field.name);
        if let Some(filename) = &field.filename {
            disposition.push_str(&format!("; filename=\"{filename}\""));
        }
        out.extend_from_slice(disposition.as_bytes());
        out.extend_from_slice(b"\r\n");
        if let Some(content_type) = &field.content_type {
            out.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&field.data);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    out
}

/// Apply `f` to every named field's value except those in `skip`, preserving
/// filenames and content types on file parts, and re-render the multipart
/// body under the same boundary.
pub async fn mutate_multipart(
    body: Bytes,
    boundary: &str,
    skip: &[String],
    f: &Mutator<'_>,
) -> Result<Vec<u8>, Error> {
    let mut fields = parse_multipart(body, boundary).await?;
    for field in fields.iter_mut() {
        if skip.iter().any(|name| name == &field.name) {
            continue;
        }
        let raw = String::from_utf8_lossy(&field.data).into_owned();
        let mutated = f(&raw)?;
        field.data = Bytes::from(mutated.into_bytes());
    }
    Ok(render_multipart(&fields, boundary))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upper(s: &str) -> Result<String, Error> {
        Ok(s.to_uppercase())
    }

    #[tokio::test]
    async fn mutates_non_skipped_fields_and_preserves_file_metadata() {
        let boundary = "XBOUND";
        let body = format!(
            "--{boundary}\r\n\
Content-Disposition: form-data; name=\"model\"\r\n\r\n\
whisper-1\r\n\
--{boundary}\r\n\
Content-Disposition: form-data; name=\"file\"; filename=\"clip.wav\"\r\n\
Content-Type: audio/wav\r\n\r\n\
rawbytes\r\n\
--{boundary}--\r\n"
        );

        let skip = vec!["model".to_string()];
        let out = mutate_multipart(Bytes::from(body), boundary, &skip, &upper)
            .await
            .unwrap();
        let rendered = String::from_utf8(out).unwrap();

        assert!(rendered.contains("whisper-1"));
        assert!(rendered.contains("RAWBYTES"));
        assert!(rendered.contains("filename=\"clip.wav\""));
        assert!(rendered.contains("Content-Type: audio/wav"));
    }
}
