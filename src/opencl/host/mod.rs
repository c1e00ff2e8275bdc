//! Эмулятор OpenCL-устройства на хосте
//!
//! Одна платформа, одно устройство. Вызовы возвращают те же коды ошибок,
//! что и настоящий драйвер (нулевой размер буфера, неверная рабочая группа,
//! незаданные аргументы ядра, неизвестное имя ядра, ошибка сборки с логом,
//! недоступное профилирование). Ядра `matrix_mul` и `matrixMul` исполняются
//! на хосте; все команды выполняются синхронно в порядке постановки.

mod kernels;

use super::driver::{ArgValue, Driver};
use super::status::ClStatus;
use super::types::*;
use kernels::{HostKernel, Launch, Param};
use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::c_void;
use std::time::Instant;
use tracing::{debug, trace};

const PLATFORM_ID: usize = 1;
const DEVICE_ID: usize = 2;
const FIRST_OBJECT_ID: usize = 16;

/// Характеристики эмулируемого устройства.
/// `None` в атрибуте означает, что запрос атрибута завершится ошибкой.
#[derive(Debug, Clone)]
pub struct HostDeviceProfile {
    pub platform_name: String,
    pub platform_vendor: String,
    pub platform_version: String,
    pub name: String,
    pub vendor: String,
    pub device_type: cl_device_type,
    pub compute_units: Option<cl_uint>,
    pub max_mem_alloc_size: Option<cl_ulong>,
    pub global_mem_size: Option<cl_ulong>,
    pub max_clock_frequency: Option<cl_uint>,
    pub max_work_group_size: usize,
    pub max_work_item_sizes: [usize; 3],
    pub local_mem_size: cl_ulong,
    /// `false` — драйвер отказывает в создании контекста
    pub available: bool,
}

impl Default for HostDeviceProfile {
    fn default() -> Self {
        Self {
            platform_name: "Host Emulation Platform".into(),
            platform_vendor: "clmatmul".into(),
            platform_version: "OpenCL 1.2 host".into(),
            name: "Host Emulated Device".into(),
            vendor: "clmatmul".into(),
            device_type: CL_DEVICE_TYPE_CPU,
            compute_units: Some(8),
            max_mem_alloc_size: Some(256 * 1024 * 1024),
            global_mem_size: Some(1024 * 1024 * 1024),
            max_clock_frequency: Some(1000),
            max_work_group_size: 256,
            max_work_item_sizes: [256, 256, 256],
            local_mem_size: 32 * 1024,
            available: true,
        }
    }
}

/// Тип объекта OpenCL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Context,
    CommandQueue,
    Program,
    Kernel,
    Buffer,
    Event,
}

/// Запись в журнале жизненного цикла эмулятора
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// `clFinish` на очереди
    Finished,
    Released(ObjectKind),
}

#[derive(Debug, Clone)]
enum BoundArg {
    Mem(usize),
    Scalar(Vec<u8>),
    Local(usize),
}

struct EventTimes {
    queued: cl_ulong,
    start: cl_ulong,
    end: cl_ulong,
    profiled: bool,
}

enum Object {
    Context,
    Queue {
        context: usize,
        profiling: bool,
    },
    Program {
        source: String,
        entry_points: Option<Vec<String>>,
        log: String,
    },
    Kernel {
        host: &'static HostKernel,
        args: Vec<Option<BoundArg>>,
    },
    Buffer {
        context: usize,
        data: Vec<u8>,
    },
    Event(EventTimes),
}

impl Object {
    fn kind(&self) -> ObjectKind {
        match self {
            Object::Context => ObjectKind::Context,
            Object::Queue { .. } => ObjectKind::CommandQueue,
            Object::Program { .. } => ObjectKind::Program,
            Object::Kernel { .. } => ObjectKind::Kernel,
            Object::Buffer { .. } => ObjectKind::Buffer,
            Object::Event(_) => ObjectKind::Event,
        }
    }
}

struct HostState {
    next_id: usize,
    objects: HashMap<usize, Object>,
    journal: Vec<Lifecycle>,
}

impl HostState {
    fn insert(&mut self, object: Object) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        self.objects.insert(id, object);
        id
    }
}

/// Драйвер, исполняющий OpenCL-вызовы в процессе
pub struct HostDriver {
    profile: HostDeviceProfile,
    epoch: Instant,
    state: RefCell<HostState>,
}

fn to_handle(id: usize) -> *mut c_void {
    id as *mut c_void
}

fn to_id(handle: *mut c_void) -> usize {
    handle as usize
}

fn now_ns(epoch: Instant) -> cl_ulong {
    epoch.elapsed().as_nanos() as cl_ulong
}

fn string_bytes(value: &str) -> Vec<u8> {
    let mut bytes = value.as_bytes().to_vec();
    bytes.push(0);
    bytes
}

/// Имена ядер, объявленных в исходнике (`__kernel void name(`)
fn parse_entry_points(source: &str) -> Vec<String> {
    let mut names = Vec::new();
    let tokens: Vec<&str> = source
        .split(|c: char| c.is_whitespace() || c == '(')
        .filter(|t| !t.is_empty())
        .collect();
    for window in tokens.windows(3) {
        if matches!(window[0], "__kernel" | "kernel") && window[1] == "void" {
            names.push(window[2].to_string());
        }
    }
    names
}

fn check_balanced(source: &str) -> Result<(), String> {
    let mut depth = 0i64;
    for (line_no, line) in source.lines().enumerate() {
        for c in line.chars() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(format!("<source>:{}: error: extraneous closing brace", line_no + 1));
                    }
                }
                _ => {}
            }
        }
    }
    if depth != 0 {
        return Err("<source>: error: expected '}' at end of input".to_string());
    }
    Ok(())
}

impl HostDriver {
    pub fn new() -> Self {
        Self::with_profile(HostDeviceProfile::default())
    }

    pub fn with_profile(profile: HostDeviceProfile) -> Self {
        Self {
            profile,
            epoch: Instant::now(),
            state: RefCell::new(HostState {
                next_id: FIRST_OBJECT_ID,
                objects: HashMap::new(),
                journal: Vec::new(),
            }),
        }
    }

    pub fn profile(&self) -> &HostDeviceProfile {
        &self.profile
    }

    /// Журнал `clFinish` и освобождений в порядке вызовов
    pub fn journal(&self) -> Vec<Lifecycle> {
        self.state.borrow().journal.clone()
    }

    /// Порядок освобождения объектов, без событий
    pub fn release_order(&self) -> Vec<ObjectKind> {
        self.journal()
            .into_iter()
            .filter_map(|entry| match entry {
                Lifecycle::Released(kind) if kind != ObjectKind::Event => Some(kind),
                _ => None,
            })
            .collect()
    }

    /// Число еще не освобожденных объектов
    pub fn live_objects(&self) -> usize {
        self.state.borrow().objects.len()
    }

    fn check_platform(&self, platform: cl_platform_id) -> Result<(), ClStatus> {
        if to_id(platform) == PLATFORM_ID {
            Ok(())
        } else {
            Err(ClStatus(CL_INVALID_PLATFORM))
        }
    }

    fn check_device(&self, device: cl_device_id) -> Result<(), ClStatus> {
        if to_id(device) == DEVICE_ID {
            Ok(())
        } else {
            Err(ClStatus(CL_INVALID_DEVICE))
        }
    }

    fn expect_kind(&self, handle: *mut c_void, kind: ObjectKind, error: cl_int) -> Result<usize, ClStatus> {
        let id = to_id(handle);
        match self.state.borrow().objects.get(&id) {
            Some(object) if object.kind() == kind => Ok(id),
            _ => Err(ClStatus(error)),
        }
    }

    fn record_event(&self, queue: usize, queued: cl_ulong, start: cl_ulong) -> Result<cl_event, ClStatus> {
        let end = now_ns(self.epoch);
        let mut state = self.state.borrow_mut();
        let profiled = match state.objects.get(&queue) {
            Some(Object::Queue { profiling, .. }) => *profiling,
            _ => return Err(ClStatus(CL_INVALID_COMMAND_QUEUE)),
        };
        let id = state.insert(Object::Event(EventTimes {
            queued,
            start,
            end,
            profiled,
        }));
        Ok(to_handle(id))
    }

    fn release(&self, handle: *mut c_void, kind: ObjectKind, error: cl_int) -> Result<(), ClStatus> {
        let id = self.expect_kind(handle, kind, error)?;
        let mut state = self.state.borrow_mut();
        state.objects.remove(&id);
        state.journal.push(Lifecycle::Released(kind));
        trace!("Released {:?} #{}", kind, id);
        Ok(())
    }

    fn buffer_range(
        &self,
        queue: cl_command_queue,
        buffer: cl_mem,
        offset: usize,
        len: usize,
    ) -> Result<(usize, usize), ClStatus> {
        let queue_id = self.expect_kind(queue, ObjectKind::CommandQueue, CL_INVALID_COMMAND_QUEUE)?;
        let buffer_id = self.expect_kind(buffer, ObjectKind::Buffer, CL_INVALID_MEM_OBJECT)?;
        let state = self.state.borrow();
        let (queue_context, buffer_context, capacity) =
            match (state.objects.get(&queue_id), state.objects.get(&buffer_id)) {
                (Some(Object::Queue { context, .. }), Some(Object::Buffer { context: owner, data })) => {
                    (*context, *owner, data.len())
                }
                _ => return Err(ClStatus(CL_INVALID_MEM_OBJECT)),
            };
        if queue_context != buffer_context {
            return Err(ClStatus(CL_INVALID_CONTEXT));
        }
        match offset.checked_add(len) {
            Some(end) if end <= capacity && len > 0 => Ok((queue_id, buffer_id)),
            _ => Err(ClStatus(CL_INVALID_VALUE)),
        }
    }

    fn check_work_size(&self, global: &[usize], local: &[usize]) -> Result<(), ClStatus> {
        if global.is_empty() || global.len() > 3 || local.len() != global.len() {
            return Err(ClStatus(CL_INVALID_WORK_DIMENSION));
        }
        if global.iter().any(|&g| g == 0) {
            return Err(ClStatus(CL_INVALID_GLOBAL_WORK_SIZE));
        }
        if local.iter().any(|&l| l == 0) {
            return Err(ClStatus(CL_INVALID_WORK_GROUP_SIZE));
        }
        for (dim, (&l, &g)) in local.iter().zip(global).enumerate() {
            if l > self.profile.max_work_item_sizes[dim] {
                return Err(ClStatus(CL_INVALID_WORK_ITEM_SIZE));
            }
            if g % l != 0 {
                return Err(ClStatus(CL_INVALID_WORK_GROUP_SIZE));
            }
        }
        if local.iter().product::<usize>() > self.profile.max_work_group_size {
            return Err(ClStatus(CL_INVALID_WORK_GROUP_SIZE));
        }
        Ok(())
    }
}

impl Default for HostDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for HostDriver {
    fn platform_ids(&self) -> Result<Vec<cl_platform_id>, ClStatus> {
        Ok(vec![to_handle(PLATFORM_ID)])
    }

    fn platform_info(
        &self,
        platform: cl_platform_id,
        param: cl_platform_info,
    ) -> Result<Vec<u8>, ClStatus> {
        self.check_platform(platform)?;
        let value = match param {
            CL_PLATFORM_NAME => &self.profile.platform_name,
            CL_PLATFORM_VENDOR => &self.profile.platform_vendor,
            CL_PLATFORM_VERSION => &self.profile.platform_version,
            CL_PLATFORM_PROFILE => return Ok(string_bytes("FULL_PROFILE")),
            _ => return Err(ClStatus(CL_INVALID_VALUE)),
        };
        Ok(string_bytes(value))
    }

    fn device_ids(
        &self,
        platform: cl_platform_id,
        device_type: cl_device_type,
    ) -> Result<Vec<cl_device_id>, ClStatus> {
        self.check_platform(platform)?;
        if device_type == CL_DEVICE_TYPE_ALL
            || device_type == CL_DEVICE_TYPE_DEFAULT
            || device_type & self.profile.device_type != 0
        {
            Ok(vec![to_handle(DEVICE_ID)])
        } else {
            Err(ClStatus(CL_DEVICE_NOT_FOUND))
        }
    }

    fn device_info(
        &self,
        device: cl_device_id,
        param: cl_device_info,
    ) -> Result<Vec<u8>, ClStatus> {
        self.check_device(device)?;
        let missing = ClStatus(CL_INVALID_VALUE);
        let p = &self.profile;
        let value = match param {
            CL_DEVICE_TYPE => p.device_type.to_ne_bytes().to_vec(),
            CL_DEVICE_NAME => string_bytes(&p.name),
            CL_DEVICE_VENDOR => string_bytes(&p.vendor),
            CL_DEVICE_MAX_COMPUTE_UNITS => p.compute_units.ok_or(missing)?.to_ne_bytes().to_vec(),
            CL_DEVICE_MAX_MEM_ALLOC_SIZE => {
                p.max_mem_alloc_size.ok_or(missing)?.to_ne_bytes().to_vec()
            }
            CL_DEVICE_GLOBAL_MEM_SIZE => p.global_mem_size.ok_or(missing)?.to_ne_bytes().to_vec(),
            CL_DEVICE_MAX_CLOCK_FREQUENCY => {
                p.max_clock_frequency.ok_or(missing)?.to_ne_bytes().to_vec()
            }
            CL_DEVICE_MAX_WORK_GROUP_SIZE => p.max_work_group_size.to_ne_bytes().to_vec(),
            CL_DEVICE_MAX_WORK_ITEM_DIMENSIONS => (3 as cl_uint).to_ne_bytes().to_vec(),
            CL_DEVICE_MAX_WORK_ITEM_SIZES => bytemuck::cast_slice(&p.max_work_item_sizes[..]).to_vec(),
            CL_DEVICE_LOCAL_MEM_SIZE => p.local_mem_size.to_ne_bytes().to_vec(),
            _ => return Err(missing),
        };
        Ok(value)
    }

    fn create_context(&self, device: cl_device_id) -> Result<cl_context, ClStatus> {
        self.check_device(device)?;
        if !self.profile.available {
            return Err(ClStatus(CL_DEVICE_NOT_AVAILABLE));
        }
        let id = self.state.borrow_mut().insert(Object::Context);
        debug!("Host context #{} created", id);
        Ok(to_handle(id))
    }

    fn create_command_queue(
        &self,
        context: cl_context,
        device: cl_device_id,
        properties: cl_command_queue_properties,
    ) -> Result<cl_command_queue, ClStatus> {
        let context = self.expect_kind(context, ObjectKind::Context, CL_INVALID_CONTEXT)?;
        self.check_device(device)?;
        let supported = CL_QUEUE_PROFILING_ENABLE | CL_QUEUE_OUT_OF_ORDER_EXEC_MODE_ENABLE;
        if properties & !supported != 0 {
            return Err(ClStatus(CL_INVALID_QUEUE_PROPERTIES));
        }
        let id = self.state.borrow_mut().insert(Object::Queue {
            context,
            profiling: properties & CL_QUEUE_PROFILING_ENABLE != 0,
        });
        Ok(to_handle(id))
    }

    fn create_program_with_source(
        &self,
        context: cl_context,
        source: &str,
    ) -> Result<cl_program, ClStatus> {
        self.expect_kind(context, ObjectKind::Context, CL_INVALID_CONTEXT)?;
        if source.is_empty() {
            return Err(ClStatus(CL_INVALID_VALUE));
        }
        let id = self.state.borrow_mut().insert(Object::Program {
            source: source.to_string(),
            entry_points: None,
            log: String::new(),
        });
        Ok(to_handle(id))
    }

    fn build_program(
        &self,
        program: cl_program,
        device: cl_device_id,
        _options: &str,
    ) -> Result<(), ClStatus> {
        let id = self.expect_kind(program, ObjectKind::Program, CL_INVALID_PROGRAM)?;
        self.check_device(device)?;
        let mut state = self.state.borrow_mut();
        let Some(Object::Program {
            source,
            entry_points,
            log,
            ..
        }) = state.objects.get_mut(&id)
        else {
            return Err(ClStatus(CL_INVALID_PROGRAM));
        };

        if let Err(message) = check_balanced(source) {
            *log = message;
            return Err(ClStatus(CL_BUILD_PROGRAM_FAILURE));
        }
        let names = parse_entry_points(source);
        if names.is_empty() {
            *log = "<source>: error: no kernel entry points found in program".to_string();
            return Err(ClStatus(CL_BUILD_PROGRAM_FAILURE));
        }
        debug!("Host program #{} built, entry points: {:?}", id, names);
        *log = String::new();
        *entry_points = Some(names);
        Ok(())
    }

    fn program_build_log(
        &self,
        program: cl_program,
        device: cl_device_id,
    ) -> Result<String, ClStatus> {
        let id = self.expect_kind(program, ObjectKind::Program, CL_INVALID_PROGRAM)?;
        self.check_device(device)?;
        match self.state.borrow().objects.get(&id) {
            Some(Object::Program { log, .. }) => Ok(log.clone()),
            _ => Err(ClStatus(CL_INVALID_PROGRAM)),
        }
    }

    fn create_kernel(&self, program: cl_program, name: &str) -> Result<cl_kernel, ClStatus> {
        let id = self.expect_kind(program, ObjectKind::Program, CL_INVALID_PROGRAM)?;
        let mut state = self.state.borrow_mut();
        let declared = match state.objects.get(&id) {
            Some(Object::Program {
                entry_points: Some(names),
                ..
            }) => names.iter().any(|n| n == name),
            Some(Object::Program { .. }) => return Err(ClStatus(CL_INVALID_PROGRAM_EXECUTABLE)),
            _ => return Err(ClStatus(CL_INVALID_PROGRAM)),
        };
        if !declared {
            return Err(ClStatus(CL_INVALID_KERNEL_NAME));
        }
        let Some(host) = kernels::lookup(name) else {
            debug!("Kernel `{}` has no host implementation", name);
            return Err(ClStatus(CL_INVALID_KERNEL_NAME));
        };
        let kernel = state.insert(Object::Kernel {
            host,
            args: vec![None; host.params.len()],
        });
        Ok(to_handle(kernel))
    }

    fn create_buffer(
        &self,
        context: cl_context,
        flags: cl_mem_flags,
        size: usize,
        host_data: Option<&[u8]>,
    ) -> Result<cl_mem, ClStatus> {
        let context = self.expect_kind(context, ObjectKind::Context, CL_INVALID_CONTEXT)?;
        let access = flags & (CL_MEM_READ_WRITE | CL_MEM_WRITE_ONLY | CL_MEM_READ_ONLY);
        if access.count_ones() > 1 {
            return Err(ClStatus(CL_INVALID_VALUE));
        }
        let limit = self.profile.max_mem_alloc_size.unwrap_or(u64::MAX);
        if size == 0 || size as u64 > limit {
            return Err(ClStatus(CL_INVALID_BUFFER_SIZE));
        }
        let copy = flags & CL_MEM_COPY_HOST_PTR != 0;
        let data = match (copy, host_data) {
            (true, Some(bytes)) if bytes.len() == size => bytes.to_vec(),
            (false, None) => vec![0u8; size],
            _ => return Err(ClStatus(CL_INVALID_HOST_PTR)),
        };
        let id = self.state.borrow_mut().insert(Object::Buffer { context, data });
        Ok(to_handle(id))
    }

    fn set_kernel_arg(
        &self,
        kernel: cl_kernel,
        index: cl_uint,
        value: ArgValue<'_>,
    ) -> Result<(), ClStatus> {
        let id = self.expect_kind(kernel, ObjectKind::Kernel, CL_INVALID_KERNEL)?;
        let mem_id = match value {
            ArgValue::Mem(mem) => Some(self.expect_kind(mem, ObjectKind::Buffer, CL_INVALID_MEM_OBJECT)?),
            _ => None,
        };
        let mut state = self.state.borrow_mut();
        let Some(Object::Kernel { host, args }) = state.objects.get_mut(&id) else {
            return Err(ClStatus(CL_INVALID_KERNEL));
        };
        let index = index as usize;
        let param = host
            .params
            .get(index)
            .ok_or(ClStatus(CL_INVALID_ARG_INDEX))?;
        let bound = match (param, value) {
            (Param::Global, ArgValue::Mem(_)) => BoundArg::Mem(mem_id.unwrap_or_default()),
            (Param::Global, _) => return Err(ClStatus(CL_INVALID_MEM_OBJECT)),
            (Param::Local, ArgValue::Local(0)) => return Err(ClStatus(CL_INVALID_ARG_SIZE)),
            (Param::Local, ArgValue::Local(size)) => BoundArg::Local(size),
            (Param::Local, _) => return Err(ClStatus(CL_INVALID_ARG_VALUE)),
            (Param::Int, ArgValue::Bytes(bytes)) if bytes.len() == 4 => {
                BoundArg::Scalar(bytes.to_vec())
            }
            (Param::Int, _) => return Err(ClStatus(CL_INVALID_ARG_SIZE)),
        };
        args[index] = Some(bound);
        Ok(())
    }

    fn enqueue_write_buffer(
        &self,
        queue: cl_command_queue,
        buffer: cl_mem,
        offset: usize,
        data: &[u8],
    ) -> Result<cl_event, ClStatus> {
        let queued = now_ns(self.epoch);
        let (queue_id, buffer_id) = self.buffer_range(queue, buffer, offset, data.len())?;
        if let Some(Object::Buffer { data: storage, .. }) =
            self.state.borrow_mut().objects.get_mut(&buffer_id)
        {
            storage[offset..offset + data.len()].copy_from_slice(data);
        }
        self.record_event(queue_id, queued, queued)
    }

    fn enqueue_read_buffer(
        &self,
        queue: cl_command_queue,
        buffer: cl_mem,
        offset: usize,
        out: &mut [u8],
    ) -> Result<cl_event, ClStatus> {
        let queued = now_ns(self.epoch);
        let (queue_id, buffer_id) = self.buffer_range(queue, buffer, offset, out.len())?;
        if let Some(Object::Buffer { data, .. }) = self.state.borrow().objects.get(&buffer_id) {
            out.copy_from_slice(&data[offset..offset + out.len()]);
        }
        self.record_event(queue_id, queued, queued)
    }

    fn enqueue_nd_range_kernel(
        &self,
        queue: cl_command_queue,
        kernel: cl_kernel,
        global: &[usize],
        local: &[usize],
    ) -> Result<cl_event, ClStatus> {
        let queued = now_ns(self.epoch);
        let queue_id = self.expect_kind(queue, ObjectKind::CommandQueue, CL_INVALID_COMMAND_QUEUE)?;
        let kernel_id = self.expect_kind(kernel, ObjectKind::Kernel, CL_INVALID_KERNEL)?;
        self.check_work_size(global, local)?;

        let (host, args) = match self.state.borrow().objects.get(&kernel_id) {
            Some(Object::Kernel { host, args }) => (*host, args.clone()),
            _ => return Err(ClStatus(CL_INVALID_KERNEL)),
        };
        let args = args
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or(ClStatus(CL_INVALID_KERNEL_ARGS))?;
        let scratch: usize = args
            .iter()
            .map(|arg| match arg {
                BoundArg::Local(size) => *size,
                _ => 0,
            })
            .sum();
        if scratch as u64 > self.profile.local_mem_size {
            return Err(ClStatus(CL_OUT_OF_RESOURCES));
        }

        let start = now_ns(self.epoch);
        {
            let mut state = self.state.borrow_mut();
            let mut launch = Launch::new(global, local, &args, &mut state.objects);
            (host.run)(&mut launch)?;
        }
        trace!("Host kernel `{}` executed over {:?}/{:?}", host.name, global, local);
        self.record_event(queue_id, queued, start)
    }

    fn wait_for_events(&self, events: &[cl_event]) -> Result<(), ClStatus> {
        if events.is_empty() {
            return Err(ClStatus(CL_INVALID_VALUE));
        }
        for &event in events {
            self.expect_kind(event, ObjectKind::Event, CL_INVALID_EVENT)?;
        }
        // Команды выполняются синхронно, к этому моменту все завершено
        Ok(())
    }

    fn event_profiling_info(
        &self,
        event: cl_event,
        param: cl_profiling_info,
    ) -> Result<cl_ulong, ClStatus> {
        let id = self.expect_kind(event, ObjectKind::Event, CL_INVALID_EVENT)?;
        let state = self.state.borrow();
        let Some(Object::Event(times)) = state.objects.get(&id) else {
            return Err(ClStatus(CL_INVALID_EVENT));
        };
        if !times.profiled {
            return Err(ClStatus(CL_PROFILING_INFO_NOT_AVAILABLE));
        }
        match param {
            CL_PROFILING_COMMAND_QUEUED => Ok(times.queued),
            CL_PROFILING_COMMAND_SUBMIT | CL_PROFILING_COMMAND_START => Ok(times.start),
            CL_PROFILING_COMMAND_END => Ok(times.end),
            _ => Err(ClStatus(CL_INVALID_VALUE)),
        }
    }

    fn flush(&self, queue: cl_command_queue) -> Result<(), ClStatus> {
        self.expect_kind(queue, ObjectKind::CommandQueue, CL_INVALID_COMMAND_QUEUE)
            .map(|_| ())
    }

    fn finish(&self, queue: cl_command_queue) -> Result<(), ClStatus> {
        self.expect_kind(queue, ObjectKind::CommandQueue, CL_INVALID_COMMAND_QUEUE)?;
        self.state.borrow_mut().journal.push(Lifecycle::Finished);
        Ok(())
    }

    fn release_event(&self, event: cl_event) -> Result<(), ClStatus> {
        self.release(event, ObjectKind::Event, CL_INVALID_EVENT)
    }

    fn release_mem_object(&self, buffer: cl_mem) -> Result<(), ClStatus> {
        self.release(buffer, ObjectKind::Buffer, CL_INVALID_MEM_OBJECT)
    }

    fn release_kernel(&self, kernel: cl_kernel) -> Result<(), ClStatus> {
        self.release(kernel, ObjectKind::Kernel, CL_INVALID_KERNEL)
    }

    fn release_program(&self, program: cl_program) -> Result<(), ClStatus> {
        self.release(program, ObjectKind::Program, CL_INVALID_PROGRAM)
    }

    fn release_command_queue(&self, queue: cl_command_queue) -> Result<(), ClStatus> {
        self.release(queue, ObjectKind::CommandQueue, CL_INVALID_COMMAND_QUEUE)
    }

    fn release_context(&self, context: cl_context) -> Result<(), ClStatus> {
        self.release(context, ObjectKind::Context, CL_INVALID_CONTEXT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context_and_queue(driver: &HostDriver, properties: cl_command_queue_properties) -> (cl_context, cl_command_queue) {
        let device = driver.device_ids(to_handle(PLATFORM_ID), CL_DEVICE_TYPE_ALL).unwrap()[0];
        let context = driver.create_context(device).unwrap();
        let queue = driver.create_command_queue(context, device, properties).unwrap();
        (context, queue)
    }

    #[test]
    fn test_parse_entry_points() {
        let source = "__kernel void matrix_mul(__global float* a) {}\nkernel void matrixMul (int x) {}";
        assert_eq!(parse_entry_points(source), vec!["matrix_mul", "matrixMul"]);
        assert!(parse_entry_points("void helper() {}").is_empty());
    }

    #[test]
    fn test_unbalanced_source_fails_build_with_log() {
        let driver = HostDriver::new();
        let (context, _queue) = context_and_queue(&driver, 0);
        let device = to_handle(DEVICE_ID);
        let program = driver
            .create_program_with_source(context, "__kernel void matrix_mul() {")
            .unwrap();
        assert_eq!(
            driver.build_program(program, device, ""),
            Err(ClStatus(CL_BUILD_PROGRAM_FAILURE))
        );
        assert!(driver.program_build_log(program, device).unwrap().contains("expected '}'"));
        assert_eq!(
            driver.create_kernel(program, "matrix_mul"),
            Err(ClStatus(CL_INVALID_PROGRAM_EXECUTABLE))
        );
    }

    #[test]
    fn test_gpu_request_on_cpu_profile_is_not_found() {
        let driver = HostDriver::new();
        assert_eq!(
            driver.device_ids(to_handle(PLATFORM_ID), CL_DEVICE_TYPE_GPU),
            Err(ClStatus(CL_DEVICE_NOT_FOUND))
        );
    }

    #[test]
    fn test_buffer_size_rules() {
        let driver = HostDriver::new();
        let (context, _queue) = context_and_queue(&driver, 0);
        assert_eq!(
            driver.create_buffer(context, CL_MEM_READ_ONLY, 0, None),
            Err(ClStatus(CL_INVALID_BUFFER_SIZE))
        );
        assert_eq!(
            driver.create_buffer(context, CL_MEM_READ_WRITE | CL_MEM_COPY_HOST_PTR, 8, Some(&[0u8; 4])),
            Err(ClStatus(CL_INVALID_HOST_PTR))
        );
        assert_eq!(
            driver.create_buffer(context, CL_MEM_READ_ONLY | CL_MEM_WRITE_ONLY, 8, None),
            Err(ClStatus(CL_INVALID_VALUE))
        );
    }

    #[test]
    fn test_write_then_read_roundtrip_through_queue() {
        let driver = HostDriver::new();
        let (context, queue) = context_and_queue(&driver, 0);
        let buffer = driver.create_buffer(context, CL_MEM_READ_WRITE, 8, None).unwrap();
        let event = driver.enqueue_write_buffer(queue, buffer, 0, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        driver.wait_for_events(&[event]).unwrap();

        let mut out = [0u8; 4];
        driver.enqueue_read_buffer(queue, buffer, 4, &mut out).unwrap();
        assert_eq!(out, [5, 6, 7, 8]);

        let mut too_long = [0u8; 16];
        assert_eq!(
            driver.enqueue_read_buffer(queue, buffer, 0, &mut too_long),
            Err(ClStatus(CL_INVALID_VALUE))
        );
    }

    #[test]
    fn test_profiling_requires_profiling_queue() {
        let driver = HostDriver::new();
        let (context, queue) = context_and_queue(&driver, 0);
        let buffer = driver.create_buffer(context, CL_MEM_READ_WRITE, 4, None).unwrap();
        let event = driver.enqueue_write_buffer(queue, buffer, 0, &[0; 4]).unwrap();
        assert_eq!(
            driver.event_profiling_info(event, CL_PROFILING_COMMAND_END),
            Err(ClStatus(CL_PROFILING_INFO_NOT_AVAILABLE))
        );
    }

    #[test]
    fn test_release_is_journaled_and_double_release_fails() {
        let driver = HostDriver::new();
        let (context, queue) = context_and_queue(&driver, 0);
        driver.finish(queue).unwrap();
        driver.release_command_queue(queue).unwrap();
        driver.release_context(context).unwrap();
        assert_eq!(
            driver.journal(),
            vec![
                Lifecycle::Finished,
                Lifecycle::Released(ObjectKind::CommandQueue),
                Lifecycle::Released(ObjectKind::Context),
            ]
        );
        assert_eq!(driver.release_context(context), Err(ClStatus(CL_INVALID_CONTEXT)));
        assert_eq!(driver.live_objects(), 0);
    }
}
