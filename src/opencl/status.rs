//! Коды возврата OpenCL и их символьные имена

use super::types::*;
use std::fmt;

/// Код возврата вызова OpenCL, отличный от `CL_SUCCESS`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClStatus(pub cl_int);

impl ClStatus {
    /// Превращает сырой код в `Result`
    pub fn check(code: cl_int) -> Result<(), ClStatus> {
        if code == CL_SUCCESS {
            Ok(())
        } else {
            Err(ClStatus(code))
        }
    }

    pub fn code(self) -> cl_int {
        self.0
    }

    /// Символьное имя кода, как в заголовках `CL/cl.h`
    pub fn name(self) -> &'static str {
        match self.0 {
            CL_SUCCESS => "CL_SUCCESS",
            CL_DEVICE_NOT_FOUND => "CL_DEVICE_NOT_FOUND",
            CL_DEVICE_NOT_AVAILABLE => "CL_DEVICE_NOT_AVAILABLE",
            CL_COMPILER_NOT_AVAILABLE => "CL_COMPILER_NOT_AVAILABLE",
            CL_MEM_OBJECT_ALLOCATION_FAILURE => "CL_MEM_OBJECT_ALLOCATION_FAILURE",
            CL_OUT_OF_RESOURCES => "CL_OUT_OF_RESOURCES",
            CL_OUT_OF_HOST_MEMORY => "CL_OUT_OF_HOST_MEMORY",
            CL_PROFILING_INFO_NOT_AVAILABLE => "CL_PROFILING_INFO_NOT_AVAILABLE",
            CL_MEM_COPY_OVERLAP => "CL_MEM_COPY_OVERLAP",
            CL_IMAGE_FORMAT_MISMATCH => "CL_IMAGE_FORMAT_MISMATCH",
            CL_IMAGE_FORMAT_NOT_SUPPORTED => "CL_IMAGE_FORMAT_NOT_SUPPORTED",
            CL_BUILD_PROGRAM_FAILURE => "CL_BUILD_PROGRAM_FAILURE",
            CL_MAP_FAILURE => "CL_MAP_FAILURE",
            CL_MISALIGNED_SUB_BUFFER_OFFSET => "CL_MISALIGNED_SUB_BUFFER_OFFSET",
            CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST => {
                "CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST"
            }
            CL_COMPILE_PROGRAM_FAILURE => "CL_COMPILE_PROGRAM_FAILURE",
            CL_LINKER_NOT_AVAILABLE => "CL_LINKER_NOT_AVAILABLE",
            CL_LINK_PROGRAM_FAILURE => "CL_LINK_PROGRAM_FAILURE",
            CL_DEVICE_PARTITION_FAILED => "CL_DEVICE_PARTITION_FAILED",
            CL_KERNEL_ARG_INFO_NOT_AVAILABLE => "CL_KERNEL_ARG_INFO_NOT_AVAILABLE",
            CL_INVALID_VALUE => "CL_INVALID_VALUE",
            CL_INVALID_DEVICE_TYPE => "CL_INVALID_DEVICE_TYPE",
            CL_INVALID_PLATFORM => "CL_INVALID_PLATFORM",
            CL_INVALID_DEVICE => "CL_INVALID_DEVICE",
            CL_INVALID_CONTEXT => "CL_INVALID_CONTEXT",
            CL_INVALID_QUEUE_PROPERTIES => "CL_INVALID_QUEUE_PROPERTIES",
            CL_INVALID_COMMAND_QUEUE => "CL_INVALID_COMMAND_QUEUE",
            CL_INVALID_HOST_PTR => "CL_INVALID_HOST_PTR",
            CL_INVALID_MEM_OBJECT => "CL_INVALID_MEM_OBJECT",
            CL_INVALID_IMAGE_FORMAT_DESCRIPTOR => "CL_INVALID_IMAGE_FORMAT_DESCRIPTOR",
            CL_INVALID_IMAGE_SIZE => "CL_INVALID_IMAGE_SIZE",
            CL_INVALID_SAMPLER => "CL_INVALID_SAMPLER",
            CL_INVALID_BINARY => "CL_INVALID_BINARY",
            CL_INVALID_BUILD_OPTIONS => "CL_INVALID_BUILD_OPTIONS",
            CL_INVALID_PROGRAM => "CL_INVALID_PROGRAM",
            CL_INVALID_PROGRAM_EXECUTABLE => "CL_INVALID_PROGRAM_EXECUTABLE",
            CL_INVALID_KERNEL_NAME => "CL_INVALID_KERNEL_NAME",
            CL_INVALID_KERNEL_DEFINITION => "CL_INVALID_KERNEL_DEFINITION",
            CL_INVALID_KERNEL => "CL_INVALID_KERNEL",
            CL_INVALID_ARG_INDEX => "CL_INVALID_ARG_INDEX",
            CL_INVALID_ARG_VALUE => "CL_INVALID_ARG_VALUE",
            CL_INVALID_ARG_SIZE => "CL_INVALID_ARG_SIZE",
            CL_INVALID_KERNEL_ARGS => "CL_INVALID_KERNEL_ARGS",
            CL_INVALID_WORK_DIMENSION => "CL_INVALID_WORK_DIMENSION",
            CL_INVALID_WORK_GROUP_SIZE => "CL_INVALID_WORK_GROUP_SIZE",
            CL_INVALID_WORK_ITEM_SIZE => "CL_INVALID_WORK_ITEM_SIZE",
            CL_INVALID_GLOBAL_OFFSET => "CL_INVALID_GLOBAL_OFFSET",
            CL_INVALID_EVENT_WAIT_LIST => "CL_INVALID_EVENT_WAIT_LIST",
            CL_INVALID_EVENT => "CL_INVALID_EVENT",
            CL_INVALID_OPERATION => "CL_INVALID_OPERATION",
            CL_INVALID_GL_OBJECT => "CL_INVALID_GL_OBJECT",
            CL_INVALID_BUFFER_SIZE => "CL_INVALID_BUFFER_SIZE",
            CL_INVALID_MIP_LEVEL => "CL_INVALID_MIP_LEVEL",
            CL_INVALID_GLOBAL_WORK_SIZE => "CL_INVALID_GLOBAL_WORK_SIZE",
            CL_INVALID_PROPERTY => "CL_INVALID_PROPERTY",
            _ => "CL_UNKNOWN_ERROR",
        }
    }
}

impl fmt::Display for ClStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}

impl std::error::Error for ClStatus {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_success_and_failure() {
        assert!(ClStatus::check(CL_SUCCESS).is_ok());
        assert_eq!(
            ClStatus::check(CL_INVALID_WORK_GROUP_SIZE),
            Err(ClStatus(CL_INVALID_WORK_GROUP_SIZE))
        );
    }

    #[test]
    fn test_symbolic_names() {
        assert_eq!(ClStatus(CL_BUILD_PROGRAM_FAILURE).name(), "CL_BUILD_PROGRAM_FAILURE");
        assert_eq!(
            ClStatus(CL_INVALID_BUFFER_SIZE).to_string(),
            "CL_INVALID_BUFFER_SIZE (-61)"
        );
        assert_eq!(ClStatus(-1001).name(), "CL_UNKNOWN_ERROR");
    }
}
