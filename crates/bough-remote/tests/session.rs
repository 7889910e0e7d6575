//! Whole helper sessions against scripted servers.

use bough_git::PktLineWriter;
use bough_remote::{
    GitRepository, LocalRepository, Method, RemoteConfig, RemoteHelper, ScriptedResponse,
    ScriptedTransport,
};
use bough_storage::{GitObject, LooseObjectDir, ObjectId, ObjectSource};
use bough_tree::TreeBuf;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const A: &str = "1111111111111111111111111111111111111111";

fn advertisement(service: &str, caps: &str) -> Vec<u8> {
    let mut w = PktLineWriter::new(Vec::new());
    w.write_line(&format!("# service={service}")).unwrap();
    w.flush_pkt().unwrap();
    w.write_line(&format!("{A} refs/heads/main\0{caps}")).unwrap();
    w.flush_pkt().unwrap();
    w.into_inner()
}

/// Writes an executable standing in for `git`.
#[cfg(unix)]
fn fake_git(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join("fake-git");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn config(git_program: &Path) -> RemoteConfig {
    RemoteConfig {
        git_program: git_program.display().to_string(),
        send_pack_program: git_program.display().to_string(),
        credential_helper: String::new(),
        ..RemoteConfig::default()
    }
}

fn run(helper: &mut RemoteHelper<ScriptedTransport>, input: &str) -> String {
    let mut out = Vec::new();
    helper
        .run(&mut Cursor::new(input.as_bytes().to_vec()), &mut out)
        .unwrap();
    String::from_utf8(out).unwrap()
}

#[cfg(unix)]
#[test]
fn test_smart_push() {
    let dir = TempDir::new().unwrap();
    let git = fake_git(
        dir.path(),
        &format!(
            "echo \"$@\" > {d}/args\n\
             printf '000ccommands0000'\n\
             printf '0000'\n\
             cat > {d}/stdin\n\
             printf 'ok refs/heads/main\\n'",
            d = dir.path().display()
        ),
    );

    let transport = ScriptedTransport::new();
    let adv = advertisement("git-receive-pack", "report-status delete-refs");
    transport
        .respond(ScriptedResponse::ok(
            "application/x-git-receive-pack-advertisement",
            adv.clone(),
        ))
        .respond(ScriptedResponse::ok(
            "application/x-git-receive-pack-result",
            "REPORT",
        ));

    let mut helper = RemoteHelper::new("https://h/r.git", config(&git), transport.clone(), None).unwrap();
    let out = run(
        &mut helper,
        "option progress false\npush refs/heads/main:refs/heads/main\n\n",
    );
    assert_eq!(out, "ok\nok refs/heads/main\n\n");

    let args = std::fs::read_to_string(dir.path().join("args")).unwrap();
    assert_eq!(
        args.trim_end(),
        "send-pack --stateless-rpc --helper-status --thin --no-progress \
         https://h/r.git/ refs/heads/main:refs/heads/main"
    );

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(
        requests[0].url,
        "https://h/r.git/info/refs?service=git-receive-pack"
    );
    assert_eq!(requests[1].method, Method::Post);
    assert_eq!(requests[1].url, "https://h/r.git/git-receive-pack");
    assert_eq!(requests[1].body, b"commands");

    // The child saw the advertisement without the service header, then
    // the server's response.
    let stdin = std::fs::read(dir.path().join("stdin")).unwrap();
    let header_len = 4 + "# service=git-receive-pack\n".len() + 4;
    let mut expected = adv[header_len..].to_vec();
    expected.extend_from_slice(b"REPORT");
    assert_eq!(stdin, expected);
}

#[cfg(unix)]
#[test]
fn test_smart_fetch() {
    let dir = TempDir::new().unwrap();
    let git = fake_git(
        dir.path(),
        &format!(
            "echo \"$@\" > {d}/args\n\
             printf '000bwant 1\\n'\n\
             printf '0009done\\n0000'\n\
             printf '0000'\n\
             cat > {d}/stdin\n\
             printf 'lock .git/objects/pack/pack-1.keep\\n'",
            d = dir.path().display()
        ),
    );
    let repo = TempDir::new().unwrap();

    let transport = ScriptedTransport::new();
    transport
        .respond(ScriptedResponse::ok(
            "application/x-git-upload-pack-advertisement",
            advertisement("git-upload-pack", "multi_ack side-band-64k"),
        ))
        .respond(ScriptedResponse::ok(
            "application/x-git-upload-pack-result",
            "PACK",
        ));

    let mut helper = RemoteHelper::new(
        "https://h/r.git",
        config(&git),
        transport.clone(),
        Some(repo.path().to_path_buf()),
    )
    .unwrap();
    let out = run(&mut helper, &format!("list\nfetch {A} refs/heads/main\n\n"));
    assert_eq!(
        out,
        format!("{A} refs/heads/main\n\nlock .git/objects/pack/pack-1.keep\n\n")
    );

    let args = std::fs::read_to_string(dir.path().join("args")).unwrap();
    assert!(args.starts_with("fetch-pack --stateless-rpc --stdin --lock-pack --thin"));

    let requests = transport.requests();
    // The cached discovery serves both list and fetch.
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].body, b"want 1\ndone\n");
    assert_eq!(
        requests[1].header("Accept"),
        Some("application/x-git-upload-pack-result")
    );

    let stdin = std::fs::read(dir.path().join("stdin")).unwrap();
    assert!(stdin.starts_with(b"0014refs/heads/main\n0000"));
    assert!(stdin.ends_with(b"PACK"));
}

#[test]
fn test_dumb_fetch() {
    let blob = GitObject::blob(b"hello\n".to_vec());
    let tree = TreeBuf::new().file("hello.txt", blob.id).into_object();
    let commit = GitObject::commit(
        &tree.id,
        &[],
        "A U Thor <author@example.com> 0 +0000",
        "A U Thor <author@example.com> 0 +0000",
        "first\n",
    );
    let repo = TempDir::new().unwrap();

    let transport = ScriptedTransport::new();
    transport
        .respond(ScriptedResponse::ok(
            "text/plain",
            format!("{}\trefs/heads/main\n", commit.id),
        ))
        .respond(ScriptedResponse::ok("text/plain", "ref: refs/heads/main\n"));
    for object in [&commit, &tree, &blob] {
        transport.respond(ScriptedResponse::ok(
            "application/octet-stream",
            LooseObjectDir::encode(object).unwrap(),
        ));
    }

    let mut helper = RemoteHelper::new(
        "https://h/r.git",
        config(Path::new("git")),
        transport.clone(),
        Some(repo.path().to_path_buf()),
    )
    .unwrap();
    let out = run(
        &mut helper,
        &format!("list\nfetch {} refs/heads/main\n\n", commit.id),
    );
    assert_eq!(
        out,
        format!(
            "@refs/heads/main HEAD\n{} refs/heads/main\n\n\n",
            commit.id
        )
    );

    let local = LooseObjectDir::new(repo.path().join("objects"));
    for object in [&commit, &tree, &blob] {
        assert!(local.contains(&object.id).unwrap());
    }
    assert_eq!(transport.pending(), 0);
}

#[test]
fn test_dumb_fetch_by_bare_id() {
    let blob = GitObject::blob(b"loose\n".to_vec());
    let tree = TreeBuf::new().file("loose.txt", blob.id).into_object();
    let repo = TempDir::new().unwrap();

    let transport = ScriptedTransport::new();
    transport
        .respond(ScriptedResponse::ok("text/plain", format!("{A}\trefs/heads/main\n")))
        .respond(ScriptedResponse::status(404));
    for object in [&tree, &blob] {
        transport.respond(ScriptedResponse::ok(
            "application/octet-stream",
            LooseObjectDir::encode(object).unwrap(),
        ));
    }

    let mut helper = RemoteHelper::new(
        "https://h/r.git",
        config(Path::new("git")),
        transport.clone(),
        Some(repo.path().to_path_buf()),
    )
    .unwrap();
    let out = run(&mut helper, &format!("fetch {}\n\n", tree.id));
    assert_eq!(out, "\n");

    let local = LooseObjectDir::new(repo.path().join("objects"));
    assert!(local.contains(&tree.id).unwrap());
    assert!(local.contains(&blob.id).unwrap());
    assert_eq!(transport.pending(), 0);
}

#[cfg(unix)]
#[test]
fn test_dumb_push_falls_back_to_http_push() {
    let dir = TempDir::new().unwrap();
    let git = fake_git(
        dir.path(),
        &format!(
            "echo \"$@\" > {d}/args\nprintf 'ok refs/heads/main\\n'",
            d = dir.path().display()
        ),
    );

    let transport = ScriptedTransport::new();
    transport
        .respond(ScriptedResponse::ok("text/plain", format!("{A}\trefs/heads/main\n")))
        .respond(ScriptedResponse::status(404));

    let mut helper = RemoteHelper::new("https://h/r.git", config(&git), transport, None).unwrap();
    let out = run(
        &mut helper,
        "option dry-run true\noption verbosity 2\npush refs/heads/main\n\n",
    );
    assert_eq!(out, "ok\nok\nok refs/heads/main\n\n");

    let args = std::fs::read_to_string(dir.path().join("args")).unwrap();
    assert_eq!(
        args.trim_end(),
        "http-push --helper-status --dry-run --verbose https://h/r.git/ refs/heads/main"
    );
}

#[cfg(unix)]
#[test]
fn test_dumb_push_failure_is_fatal() {
    let dir = TempDir::new().unwrap();
    let git = fake_git(dir.path(), "exit 1");

    let transport = ScriptedTransport::new();
    transport
        .respond(ScriptedResponse::ok("text/plain", format!("{A}\trefs/heads/main\n")))
        .respond(ScriptedResponse::status(404));

    let mut helper = RemoteHelper::new("https://h/r.git", config(&git), transport, None).unwrap();
    let err = helper
        .run(
            &mut Cursor::new(b"push refs/heads/main\n\n".to_vec()),
            &mut Vec::new(),
        )
        .unwrap_err();
    assert!(err.to_string().starts_with("git-http-push failed"));
    assert_eq!(err.exit_code(), 128);
}

#[cfg(unix)]
#[test]
fn test_git_repository_plumbing() {
    let dir = TempDir::new().unwrap();
    let blob = GitObject::blob("hello");
    let other = ObjectId::from_bytes([7; 20]);
    let git = fake_git(
        dir.path(),
        &format!(
            "echo \"$GIT_DIR\" > {d}/git_dir\n\
             case \"$1 $2\" in\n\
             'rev-parse --verify') [ \"$4\" = refs/heads/main ] && echo {id} || exit 1 ;;\n\
             'cat-file -t') [ \"$3\" = {id} ] && echo blob || exit 1 ;;\n\
             'cat-file -e') [ \"$3\" = {id} ] || exit 1 ;;\n\
             'cat-file blob') printf hello ;;\n\
             'merge-base --is-ancestor') [ \"$3\" = {id} ] && exit 0 || exit 128 ;;\n\
             *) exit 2 ;;\n\
             esac",
            d = dir.path().display(),
            id = blob.id
        ),
    );
    let repo = GitRepository::new(git.display().to_string(), Some(dir.path().join("repo.git")));

    assert_eq!(repo.resolve("refs/heads/main").unwrap(), Some(blob.id));
    assert_eq!(repo.resolve("refs/heads/nope").unwrap(), None);
    assert!(repo.contains(&blob.id).unwrap());
    assert!(!repo.contains(&other).unwrap());
    assert_eq!(repo.read(&blob.id).unwrap(), Some(blob.clone()));
    assert_eq!(repo.read(&other).unwrap(), None);

    assert!(repo.is_ancestor(&blob.id, &other).unwrap());
    assert!(repo.is_ancestor(&other, &blob.id).is_err());

    let git_dir = std::fs::read_to_string(dir.path().join("git_dir")).unwrap();
    assert_eq!(git_dir.trim_end(), dir.path().join("repo.git").display().to_string());
}
