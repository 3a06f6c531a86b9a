//! Project, repository and code review endpoints.

use super::{ClientError, SpaceClient, expect_success, parse_response, segment};
use crate::objects::DataList;
use crate::objects::repository::{
    BranchInfo, GitEntry, MergeRequestRecord, Page, PageRequest, ProjectRecord, RepositoryUrls,
};
use crate::objects::status::ExternalCheckReport;

impl SpaceClient {
    /// `GET /api/http/projects/key:{key}`
    pub async fn get_project(&self, project_key: &str) -> Result<ProjectRecord, ClientError> {
        let url = self.endpoint(&format!("/api/http/projects/key:{}", segment(project_key)))?;
        let resp = self.send(|http| http.get(url.clone())).await?;
        parse_response(resp).await
    }

    /// `GET /api/http/projects/key:{key}/repositories/{repo}/url`
    pub async fn get_repository_urls(
        &self,
        project_key: &str,
        repository: &str,
    ) -> Result<RepositoryUrls, ClientError> {
        let url = self.endpoint(&format!(
            "/api/http/projects/key:{}/repositories/{}/url",
            segment(project_key),
            segment(repository)
        ))?;
        let resp = self.send(|http| http.get(url.clone())).await?;
        parse_response(resp).await
    }

    /// `GET /api/http/projects/key:{key}/repositories/{repo}/heads`
    pub async fn list_branches(
        &self,
        project_key: &str,
        repository: &str,
        page: &PageRequest,
    ) -> Result<Page<BranchInfo>, ClientError> {
        let url = self.endpoint(&format!(
            "/api/http/projects/key:{}/repositories/{}/heads",
            segment(project_key),
            segment(repository)
        ))?;
        let resp = self.send(|http| http.get(url.clone()).query(page)).await?;
        parse_response(resp).await
    }

    /// `GET /api/http/projects/key:{key}/code-reviews?state=Opened&repository={repo}`
    pub async fn list_open_merge_requests(
        &self,
        project_key: &str,
        repository: &str,
        page: &PageRequest,
    ) -> Result<Page<MergeRequestRecord>, ClientError> {
        let url = self.endpoint(&format!(
            "/api/http/projects/key:{}/code-reviews",
            segment(project_key)
        ))?;
        let resp = self
            .send(|http| {
                http.get(url.clone())
                    .query(&[("state", "Opened"), ("type", "MergeRequest")])
                    .query(&[("repository", repository)])
                    .query(page)
            })
            .await?;
        parse_response(resp).await
    }

    /// `GET /api/http/projects/id:{project_id}/code-reviews/id:{review_id}`
    pub async fn get_merge_request(
        &self,
        project_id: &str,
        review_id: &str,
    ) -> Result<MergeRequestRecord, ClientError> {
        let url = self.endpoint(&format!(
            "/api/http/projects/id:{}/code-reviews/id:{}",
            segment(project_id),
            segment(review_id)
        ))?;
        let resp = self.send(|http| http.get(url.clone())).await?;
        parse_response(resp).await
    }

    /// `GET /api/http/projects/key:{key}/repositories/{repo}/files?commit=&path=`
    pub async fn list_files(
        &self,
        project_key: &str,
        repository: &str,
        commit: &str,
        path: &str,
    ) -> Result<Vec<GitEntry>, ClientError> {
        let url = self.endpoint(&format!(
            "/api/http/projects/key:{}/repositories/{}/files",
            segment(project_key),
            segment(repository)
        ))?;
        let resp = self
            .send(|http| {
                http.get(url.clone())
                    .query(&[("commit", commit), ("path", path)])
            })
            .await?;
        let list: DataList<GitEntry> = parse_response(resp).await?;
        Ok(list.data)
    }

    /// `POST /api/http/projects/key:{key}/repositories/{repo}/revisions/{rev}/external-checks`
    pub async fn report_external_check_status(
        &self,
        report: &ExternalCheckReport,
    ) -> Result<(), ClientError> {
        let url = self.endpoint(&format!(
            "/api/http/projects/key:{}/repositories/{}/revisions/{}/external-checks",
            segment(&report.project_key),
            segment(&report.repository),
            segment(&report.revision)
        ))?;
        let resp = self.send(|http| http.post(url.clone()).json(report)).await?;
        expect_success(resp).await
    }
}
