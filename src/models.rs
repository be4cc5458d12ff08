use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::fetch::TemplateLocator;
use crate::validation::{validate_required, ValidationError, ValidationErrors, Validator};

/// Body of `POST /api/docs/generate`.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct GenerateRequest {
    /// Template download URL.
    #[schema(example = "https://cdn.example.com/templates/act.docx")]
    pub url: Option<String>,
    /// Template file name inside the server's templates directory.
    #[schema(example = "act.docx")]
    pub file_name: Option<String>,
    /// Template key in object storage.
    #[schema(example = "crm/templates/act.xlsx")]
    pub s3_key: Option<String>,
    /// Data substituted into the template.
    #[schema(value_type = Object, example = json!({"client": {"name": "Alice"}, "act_date": "2024-03-15"}))]
    pub document_data: Value,
    /// Output file name without extension.
    #[schema(example = "Act 15")]
    pub name: String,
    /// Convert the rendered document to PDF.
    #[serde(default)]
    #[schema(default = false)]
    pub is_pdf: Option<bool>,
}

impl GenerateRequest {
    pub fn wants_pdf(&self) -> bool {
        self.is_pdf.unwrap_or(false)
    }

    pub fn locator(&self) -> Option<TemplateLocator> {
        TemplateLocator::from_parts(
            self.url.as_deref(),
            self.file_name.as_deref(),
            self.s3_key.as_deref(),
        )
    }
}

impl Validator for GenerateRequest {
    fn validate(&self) -> Result<(), String> {
        let mut errors = ValidationErrors::new();

        if self.locator().is_none() {
            errors.add(
                ValidationError::new("url", "no template given")
                    .with_suggestion("set one of url, file_name or s3_key"),
            );
        }
        if !self.document_data.is_object() {
            errors.add(ValidationError::new("document_data", "document_data must be a JSON object"));
        }
        validate_required(&self.name, "name", &mut errors);

        errors.into_result()
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: String,
}
