use anyhow::Result;
use std::io::Write;
use team_report_mailer::core::recipients::RecipientDirectory;
use team_report_mailer::domain::ports::RecipientSource;
use team_report_mailer::ReportError;
use tempfile::NamedTempFile;

fn csv_file(content: &str) -> NamedTempFile {
    csv_bytes(content.as_bytes())
}

fn csv_bytes(content: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content).unwrap();
    file.flush().unwrap();
    file
}

fn directory(file: &NamedTempFile) -> RecipientDirectory {
    RecipientDirectory::new(file.path(), "Equipe", "Nome da Equipe", "Email")
}

#[tokio::test]
async fn test_row_missing_address_is_dropped() {
    let file = csv_file(
        "Equipe,Nome da Equipe,Email\n\
         100,Alpha,alpha@example.com\n\
         200,Beta,\n\
         300,Gamma,gamma@example.com\n",
    );

    let recipients = directory(&file).load_recipients(None).await.unwrap();

    let codes: Vec<i64> = recipients.iter().map(|r| r.team_code).collect();
    assert_eq!(codes, vec![100, 300]);
}

#[tokio::test]
async fn test_loading_is_idempotent() -> Result<()> {
    let file = csv_file(
        "Equipe,Nome da Equipe,Email\n\
         100,Alpha,Alpha@Example.com\n\
         100.0,Alpha,alpha@example.com\n\
         100,Alpha,second@example.com\n",
    );
    let dir = directory(&file);

    let first = dir.load_recipients(None).await?;
    let second = dir.load_recipients(None).await?;

    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
    assert_eq!(first[0].address, "alpha@example.com");
    assert_eq!(first[1].address, "second@example.com");
    Ok(())
}

#[tokio::test]
async fn test_filter_and_invalid_addresses() {
    let file = csv_file(
        "Email;Equipe;Nome da Equipe\n\
         ignored\n",
    );
    // semicolon file: the header is a single unknown column
    let err = directory(&file).load_recipients(None).await.unwrap_err();
    assert!(matches!(err, ReportError::ConfigError { .. }));

    let file = csv_file(
        "Nome da Equipe,Email,Equipe,Cidade\n\
         Alpha,alpha@example.com,100,Recife\n\
         Beta,beta@,200,Natal\n\
         Gamma,gamma@example.org,300,Salvador\n",
    );
    let recipients = directory(&file)
        .load_recipients(Some(&[200, 300]))
        .await
        .unwrap();

    assert_eq!(recipients.len(), 1);
    assert_eq!(recipients[0].team_code, 300);
    assert_eq!(recipients[0].name, "Gamma");
}

#[tokio::test]
async fn test_header_only_file_yields_no_recipients() {
    let file = csv_file("Equipe,Nome da Equipe,Email\n");
    let recipients = directory(&file).load_recipients(None).await.unwrap();
    assert!(recipients.is_empty());
}

#[tokio::test]
async fn test_latin1_row_does_not_abort_the_load() -> Result<()> {
    let file = csv_bytes(
        b"Equipe,Nome da Equipe,Email\n\
          100,Alpha,alpha@example.com\n\
          200,S\xe3o Paulo,sp@example.com\n\
          300,Gamma,gamma@example.com\n",
    );

    let recipients = directory(&file).load_recipients(None).await?;

    let codes: Vec<i64> = recipients.iter().map(|r| r.team_code).collect();
    assert_eq!(codes, vec![100, 200, 300]);
    assert_eq!(recipients[1].name, "S\u{FFFD}o Paulo");
    assert_eq!(recipients[1].address, "sp@example.com");
    Ok(())
}
